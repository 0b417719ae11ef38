//! The user vertex program: update, message generation and message merge.
//!
//! A program is a plain value implementing [`VertexProgram`]; the engine is
//! generic over it, so the hot loops are monomorphized per program.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::fragment::{GlobalId, LocalId};

/// Identifies the vertex an update call runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateContext {
    /// Local id in the fragment.
    pub lid: LocalId,
    /// Global id.
    pub gid: GlobalId,
    /// Round counter at the time of the call.
    pub round: u32,
    /// `true` during PEval, where the message is the program's initial message.
    pub first_round: bool,
}

/// Ephemeral per-edge view handed to [`VertexProgram::generate`].
#[derive(Debug)]
pub struct EdgeTriplet<'a, VD, ED> {
    /// Global id of the source vertex.
    pub src_id: GlobalId,
    /// Current value of the source vertex.
    pub src_value: &'a VD,
    /// Global id of the destination vertex.
    pub dst_id: GlobalId,
    /// Current value of the destination vertex (or its mirror).
    pub dst_value: &'a VD,
    /// Value of the edge.
    pub edge_value: &'a ED,
}

/// Collects the messages emitted for one edge triplet.
pub struct MessageSink<'a, M> {
    src: LocalId,
    dst: LocalId,
    out: &'a mut Vec<(LocalId, M)>,
}

impl<'a, M> MessageSink<'a, M> {
    pub(crate) fn new(src: LocalId, dst: LocalId, out: &'a mut Vec<(LocalId, M)>) -> Self {
        Self { src, dst, out }
    }

    /// Sends `message` to the triplet's source vertex.
    #[inline]
    pub fn send_to_src(&mut self, message: M) {
        self.out.push((self.src, message));
    }

    /// Sends `message` to the triplet's destination vertex.
    #[inline]
    pub fn send_to_dst(&mut self, message: M) {
        self.out.push((self.dst, message));
    }
}

/// A vertex program run by the superstep engine.
///
/// `merge` must be associative and commutative: messages for one vertex are
/// merged in an unspecified order, across threads and partitions.
pub trait VertexProgram: Sync {
    /// Vertex value type.
    type VertexData: Clone + Send + Sync + Serialize + DeserializeOwned;
    /// Edge value type.
    type EdgeData: Send + Sync;
    /// Message type.
    type Message: Clone + Send + Sync + Serialize + DeserializeOwned;

    /// Message every vertex receives in PEval.
    fn initial_message(&self) -> Self::Message;

    /// Updates `value` with the merged `message` for this round.
    ///
    /// PEval always passes the initial message. In IncEval `message` is
    /// `None` for a vertex scheduled through
    /// [`SuperstepEngine::activate`](crate::SuperstepEngine::activate) that
    /// received nothing.
    ///
    /// # Errors
    /// Any error aborts the superstep.
    fn update(
        &self,
        ctx: &UpdateContext,
        value: &mut Self::VertexData,
        message: Option<&Self::Message>,
    ) -> anyhow::Result<()>;

    /// Emits zero or more messages for one edge.
    ///
    /// # Errors
    /// Any error aborts the superstep.
    fn generate(
        &self,
        triplet: &EdgeTriplet<'_, Self::VertexData, Self::EdgeData>,
        sink: &mut MessageSink<'_, Self::Message>,
    ) -> anyhow::Result<()>;

    /// Combines two messages addressed to the same vertex.
    fn merge(&self, left: Self::Message, right: Self::Message) -> Self::Message;
}
