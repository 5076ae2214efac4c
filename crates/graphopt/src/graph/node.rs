use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::op::Operation;
use crate::rt_info::RtInfo;
use crate::tensor::TensorSpec;

/// Stable node identity. Identifiers grow monotonically, so their order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn output(self, port: usize) -> OutputRef {
        OutputRef { node: self, port }
    }

    pub fn input(self, port: usize) -> InputRef {
        InputRef { node: self, port }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Addresses one output port; this is the value that flows along edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    pub node: NodeId,
    pub port: usize,
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.node, self.port)
    }
}

/// Addresses one input port of a consumer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputRef {
    pub node: NodeId,
    pub port: usize,
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}", self.node, self.port)
    }
}

/// Input port: the producer it reads and whether that edge closes a recurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Input {
    pub(crate) source: OutputRef,
    pub(crate) back_edge: bool,
}

impl Input {
    pub fn source(&self) -> OutputRef {
        self.source
    }

    pub fn is_back_edge(&self) -> bool {
        self.back_edge
    }
}

#[derive(Debug, Clone)]
pub struct Output {
    pub(crate) spec: TensorSpec,
    pub(crate) consumers: SmallVec<[InputRef; 4]>,
    pub(crate) rt_info: RtInfo,
}

impl Output {
    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    pub fn consumers(&self) -> &[InputRef] {
        &self.consumers
    }

    pub fn rt_info(&self) -> &RtInfo {
        &self.rt_info
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: String,
    pub(crate) op: Arc<dyn Operation>,
    pub(crate) inputs: Vec<Input>,
    pub(crate) outputs: Vec<Output>,
    pub(crate) rt_info: RtInfo,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Friendly name, carried into fused-names metadata by rewrites.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &dyn Operation {
        self.op.as_ref()
    }

    pub fn shared_op(&self) -> Arc<dyn Operation> {
        Arc::clone(&self.op)
    }

    pub fn kind(&self) -> &str {
        self.op.kind()
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn input(&self, port: usize) -> Option<&Input> {
        self.inputs.get(port)
    }

    pub fn output(&self, port: usize) -> Option<&Output> {
        self.outputs.get(port)
    }

    pub fn rt_info(&self) -> &RtInfo {
        &self.rt_info
    }

    /// Total number of consumer edges across all output ports.
    pub fn consumer_count(&self) -> usize {
        self.outputs.iter().map(|output| output.consumers.len()).sum()
    }
}
