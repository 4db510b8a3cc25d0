use indexmap::IndexMap;
use petgraph::prelude::*;

pub trait UniqueGraph<N, E, Ix> {
    fn add_unique_edge(&mut self, a: NodeIndex<Ix>, b: NodeIndex<Ix>, weight: E) -> EdgeIndex<Ix>
    where
        E: PartialEq;

    fn find_node<W>(&self, weight: &W) -> Option<NodeIndex<Ix>>
    where
        W: PartialEq<N>;

    fn add_unique_node(&mut self, weight: N) -> NodeIndex<Ix>
    where
        N: PartialEq;
}

impl<N, E, D, Ix> UniqueGraph<N, E, Ix> for Graph<N, E, D, Ix>
where
    D: petgraph::EdgeType,
    Ix: petgraph::graph::IndexType,
{
    fn add_unique_edge(&mut self, a: NodeIndex<Ix>, b: NodeIndex<Ix>, weight: E) -> EdgeIndex<Ix>
    where
        E: PartialEq,
    {
        match self.find_edge(a, b) {
            Some(edge) if self.edge_weight(edge) == Some(&weight) => edge,
            _ => Graph::<N, E, D, Ix>::add_edge(self, a, b, weight),
        }
    }

    fn find_node<W>(&self, weight: &W) -> Option<NodeIndex<Ix>>
    where
        W: PartialEq<N>,
    {
        self.node_indices()
            .find(|idx| match self.node_weight(*idx) {
                Some(node) => *weight == *node,
                None => false,
            })
    }

    fn add_unique_node(&mut self, weight: N) -> NodeIndex<Ix>
    where
        N: PartialEq,
    {
        match self.find_node(&weight) {
            Some(idx) => idx,
            _ => Graph::<N, E, D, Ix>::add_node(self, weight),
        }
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Node {
    /// Synthetic entry node.
    Entry,
    /// Synthetic exit node.
    Exit,
    Block { label: String },
}

impl Node {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::Block { label } => label,
        }
    }

    #[must_use]
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Self::Entry | Self::Exit)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Control flow graph of a kernel.
///
/// Basic blocks are indexed in insertion order.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    graph: DiGraph<Node, ()>,
    entry: NodeIndex,
    exit: NodeIndex,
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        let mut graph = DiGraph::new();
        let entry = graph.add_node(Node::Entry);
        let exit = graph.add_node(Node::Exit);
        Self { graph, entry, exit }
    }
}

impl ControlFlowGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn entry(&self) -> NodeIndex {
        self.entry
    }

    #[must_use]
    pub fn exit(&self) -> NodeIndex {
        self.exit
    }

    /// Adds the basic block `label` unless it already exists.
    pub fn add_block(&mut self, label: impl Into<String>) -> NodeIndex {
        self.graph.add_unique_node(Node::Block {
            label: label.into(),
        })
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> EdgeIndex {
        self.graph.add_unique_edge(from, to, ())
    }

    /// Number of nodes including the synthetic entry and exit nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_basic_blocks() == 0
    }

    /// Number of instrumentable basic blocks.
    #[must_use]
    pub fn num_basic_blocks(&self) -> usize {
        self.graph
            .node_weights()
            .filter(|node| !node.is_synthetic())
            .count()
    }

    /// Labels of the basic blocks in index order.
    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.graph
            .node_weights()
            .filter(|node| !node.is_synthetic())
            .map(Node::label)
    }

    /// Successors of `node`.
    pub fn successors(&self, node: NodeIndex) -> impl Iterator<Item = &Node> + '_ {
        self.graph
            .neighbors_directed(node, Outgoing)
            .filter_map(|succ| self.graph.node_weight(succ))
    }

    #[must_use]
    pub fn graph(&self) -> &DiGraph<Node, ()> {
        &self.graph
    }
}

#[derive(Debug, Clone)]
pub struct Kernel {
    pub name: String,
    pub cfg: ControlFlowGraph,
}

impl Kernel {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cfg: ControlFlowGraph::new(),
        }
    }

    /// Kernel with a straight chain of basic blocks from entry to exit.
    #[must_use]
    pub fn linear<S: Into<String>>(name: impl Into<String>, labels: impl IntoIterator<Item = S>) -> Self {
        let mut kernel = Self::new(name);
        let cfg = &mut kernel.cfg;
        let mut last = cfg.entry();
        for label in labels {
            let block = cfg.add_block(label);
            cfg.add_edge(last, block);
            last = block;
        }
        let exit = cfg.exit();
        cfg.add_edge(last, exit);
        kernel
    }
}

/// Loaded module with its kernels in declaration order.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub path: String,
    pub kernels: IndexMap<String, Kernel>,
}

impl Module {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kernels: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, kernel: Kernel) {
        self.kernels.insert(kernel.name.clone(), kernel);
    }

    #[must_use]
    pub fn kernel(&self, name: &str) -> Option<&Kernel> {
        self.kernels.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{ControlFlowGraph, Kernel, Node};
    use similar_asserts as diff;

    #[test]
    fn test_unique_blocks_and_edges() {
        let mut cfg = ControlFlowGraph::new();
        let a = cfg.add_block("BB_0");
        let b = cfg.add_block("BB_1");
        diff::assert_eq!(have: cfg.add_block("BB_0"), want: a);
        let edge = cfg.add_edge(a, b);
        diff::assert_eq!(have: cfg.add_edge(a, b), want: edge);
        cfg.add_edge(b, a);

        diff::assert_eq!(have: cfg.len(), want: 4);
        diff::assert_eq!(have: cfg.num_basic_blocks(), want: 2);
        diff::assert_eq!(have: cfg.graph().edge_count(), want: 2);
        diff::assert_eq!(
            have: cfg.successors(a).cloned().collect::<Vec<_>>(),
            want: vec![Node::Block { label: "BB_1".to_string() }]
        );
    }

    #[test]
    fn test_linear_kernel() {
        let kernel = Kernel::linear("vecAdd", ["BB_0", "BB_1", "BB_2"]);
        diff::assert_eq!(
            have: kernel.cfg.labels().collect::<Vec<_>>(),
            want: vec!["BB_0", "BB_1", "BB_2"]
        );
        diff::assert_eq!(have: kernel.cfg.len(), want: 5);
        diff::assert_eq!(have: kernel.cfg.successors(kernel.cfg.entry()).count(), want: 1);

        let empty = Kernel::linear("empty", Vec::<String>::new());
        assert!(empty.cfg.is_empty());
        diff::assert_eq!(have: empty.cfg.graph().edge_count(), want: 1);
    }
}
