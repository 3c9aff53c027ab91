//! Prefix trie of decoding hypotheses, stored in an arena.
//!
//! Every node is one prefix. Nodes refer to their parent and children by
//! [`NodeId`]; removed slots go on a free list and are reused by later
//! insertions. A node can be logically dead (pruned from the beam) while it
//! still has live descendants, and is only freed once it is childless.

use crate::automaton::{AutomatonState, WordAutomaton};

/// Log-domain zero.
pub const LOG_ZERO: f32 = f32::MIN;

pub fn log_sum_exp(x: f32, y: f32) -> f32 {
    if x <= LOG_ZERO {
        return y;
    }
    if y <= LOG_ZERO {
        return x;
    }
    let max = x.max(y);
    max + ((x - max).exp() + (y - max).exp()).ln()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct TrieNode {
    /// `None` for the root.
    pub character: Option<u32>,
    pub timestep: usize,
    pub log_prob_c: f32,
    pub log_prob_b_prev: f32,
    pub log_prob_nb_prev: f32,
    pub log_prob_b_cur: f32,
    pub log_prob_nb_cur: f32,
    pub score: f32,
    pub dictionary_state: Option<AutomatonState>,
    exists: bool,
    parent: Option<NodeId>,
    children: Vec<(u32, NodeId)>,
}

impl TrieNode {
    fn new(character: Option<u32>, parent: Option<NodeId>) -> Self {
        Self {
            character,
            timestep: 0,
            log_prob_c: LOG_ZERO,
            log_prob_b_prev: LOG_ZERO,
            log_prob_nb_prev: LOG_ZERO,
            log_prob_b_cur: LOG_ZERO,
            log_prob_nb_cur: LOG_ZERO,
            score: LOG_ZERO,
            dictionary_state: None,
            exists: true,
            parent,
            children: Vec::new(),
        }
    }

    fn reset_accumulators(&mut self) {
        self.log_prob_b_prev = LOG_ZERO;
        self.log_prob_nb_prev = LOG_ZERO;
        self.log_prob_b_cur = LOG_ZERO;
        self.log_prob_nb_cur = LOG_ZERO;
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().map(|&(_, id)| id)
    }

    fn child(&self, label: u32) -> Option<NodeId> {
        self.children
            .iter()
            .find(|&&(l, _)| l == label)
            .map(|&(_, id)| id)
    }
}

#[derive(Debug, Clone)]
pub struct PathTrie {
    nodes: Vec<TrieNode>,
    free: Vec<NodeId>,
    root: NodeId,
}

impl Default for PathTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl PathTrie {
    /// A trie holding only a live root with `score = log_prob_b_prev = 0`.
    pub fn new() -> Self {
        let mut root = TrieNode::new(None, None);
        root.score = 0.0;
        root.log_prob_b_prev = 0.0;
        Self {
            nodes: vec![root],
            free: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &TrieNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TrieNode {
        &mut self.nodes[id.0]
    }

    /// Slots currently holding a node, live or dead.
    pub fn len(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn alloc(&mut self, node: TrieNode) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = node;
                id
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Finds or creates the child of `parent` labelled `new_char`.
    ///
    /// With a dictionary attached to `parent`, a new child is only created when
    /// the automaton has a transition for `new_char`; `None` means the
    /// extension was rejected.
    pub fn get_path_trie(
        &mut self,
        parent: NodeId,
        new_char: u32,
        new_timestep: usize,
        log_prob_c: f32,
        reset: bool,
        dictionary: Option<&WordAutomaton>,
    ) -> Option<NodeId> {
        if let Some(child) = self.node(parent).child(new_char) {
            let node = self.node_mut(child);
            if !node.exists {
                node.exists = true;
                node.reset_accumulators();
            }
            if node.log_prob_c < log_prob_c {
                node.log_prob_c = log_prob_c;
                node.timestep = new_timestep;
            }
            return Some(child);
        }

        let dictionary_state = match (self.node(parent).dictionary_state, dictionary) {
            (Some(state), Some(automaton)) => {
                Some(Self::advance(automaton, state, new_char, reset)?)
            }
            _ => None,
        };

        let mut node = TrieNode::new(Some(new_char), Some(parent));
        node.timestep = new_timestep;
        node.log_prob_c = log_prob_c;
        node.dictionary_state = dictionary_state;
        let child = self.alloc(node);
        self.node_mut(parent).children.push((new_char, child));
        Some(child)
    }

    fn advance(
        automaton: &WordAutomaton,
        state: AutomatonState,
        label: u32,
        reset: bool,
    ) -> Option<AutomatonState> {
        // Automaton labels are shifted by one; 0 is epsilon.
        let label = label + 1;
        match automaton.transition(state, label) {
            Some(next) => Some(next),
            None if reset && automaton.is_accepting(state) => {
                automaton.transition(automaton.start_state(), label)
            }
            None => None,
        }
    }

    /// Rotates `*_cur` into `*_prev` on every live node, recomputes its score
    /// and collects it into `out`. Dead nodes are traversed but not collected.
    pub fn iterate_to_vec(&mut self, out: &mut Vec<NodeId>) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &mut self.nodes[id.0];
            if node.exists {
                node.log_prob_b_prev = node.log_prob_b_cur;
                node.log_prob_nb_prev = node.log_prob_nb_cur;
                node.log_prob_b_cur = LOG_ZERO;
                node.log_prob_nb_cur = LOG_ZERO;
                node.score = log_sum_exp(node.log_prob_b_prev, node.log_prob_nb_prev);
                out.push(id);
            }
            stack.extend(node.children.iter().rev().map(|&(_, child)| child));
        }
    }

    /// Walks from `id` towards the root collecting labels and timesteps in
    /// chronological order. The walk stops before a node labelled
    /// `stop_label`, at the root, or after `max_steps` nodes; the node it
    /// stopped at is returned.
    pub fn get_path_vec(
        &self,
        id: NodeId,
        tokens: &mut Vec<u32>,
        timesteps: &mut Vec<usize>,
        stop_label: Option<u32>,
        max_steps: usize,
    ) -> NodeId {
        let start = tokens.len();
        let mut current = id;
        let mut steps = 0;
        while steps < max_steps {
            let node = self.node(current);
            let Some(character) = node.character else {
                break;
            };
            if stop_label == Some(character) {
                break;
            }
            tokens.push(character);
            timesteps.push(node.timestep);
            steps += 1;
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        tokens[start..].reverse();
        timesteps[start..].reverse();
        current
    }

    /// Marks `id` dead and frees it, and then any dead ancestors, once childless.
    pub fn remove(&mut self, id: NodeId) {
        self.nodes[id.0].exists = false;
        let mut current = id;
        loop {
            let node = &self.nodes[current.0];
            if node.exists || !node.children.is_empty() {
                return;
            }
            let Some(parent) = node.parent else {
                return;
            };
            let siblings = &mut self.nodes[parent.0].children;
            siblings.retain(|&(_, child)| child != current);
            self.nodes[current.0].children = Vec::new();
            self.free.push(current);
            current = parent;
        }
    }
}
