use crate::error::{Error, Result};

/// Segmentation lattice over a normalized string, solved with Viterbi.
///
/// Positions count code points. Nodes live in a flat arena and point at their
/// best predecessor by index.
#[derive(Debug)]
pub struct Lattice {
    len: usize,
    nodes: Vec<Node>,
    begin_nodes: Vec<Vec<usize>>,
    end_nodes: Vec<Vec<usize>>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: u32,
    pub pos: usize,
    pub length: usize,
    pub score: f64,
    prev: Option<usize>,
    backtrace_score: f64,
}

impl Node {
    fn new(id: u32, pos: usize, length: usize, score: f64) -> Self {
        Node { id, pos, length, score, prev: None, backtrace_score: 0.0 }
    }

    pub fn end(&self) -> usize {
        self.pos + self.length
    }

    pub fn prev(&self) -> Option<usize> {
        self.prev
    }

    pub fn backtrace_score(&self) -> f64 {
        self.backtrace_score
    }
}

const BOS: usize = 0;
const EOS: usize = 1;

impl Lattice {
    /// Empty lattice for a text of `len` code points, seeded with BOS and EOS.
    pub fn new(len: usize) -> Self {
        let mut begin_nodes = vec![Vec::new(); len + 1];
        let mut end_nodes = vec![Vec::new(); len + 1];
        let nodes = vec![Node::new(u32::MAX, 0, 0, 0.0), Node::new(u32::MAX, len, 0, 0.0)];
        end_nodes[0].push(BOS);
        begin_nodes[len].push(EOS);
        Lattice { len, nodes, begin_nodes, end_nodes }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Adds a candidate spanning `[pos, pos + length)`.
    ///
    /// The span must be non-empty and end within the text.
    pub fn insert(&mut self, pos: usize, length: usize, id: u32, score: f64) -> Result<()> {
        if length == 0 || pos.checked_add(length).map_or(true, |end| end > self.len) {
            return Err(Error::InvalidSpan { pos, length, len: self.len });
        }
        self.push_node(pos, length, id, score);
        Ok(())
    }

    /// [`insert`](Self::insert) for spans already known to be in bounds.
    pub(crate) fn push_node(&mut self, pos: usize, length: usize, id: u32, score: f64) {
        let idx = self.nodes.len();
        self.nodes.push(Node::new(id, pos, length, score));
        self.begin_nodes[pos].push(idx);
        self.end_nodes[pos + length].push(idx);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn begin_nodes(&self, pos: usize) -> impl Iterator<Item = &Node> {
        self.begin_nodes[pos].iter().map(|&i| &self.nodes[i])
    }

    /// Solves the lattice and returns the best path's token ids, BOS/EOS excluded.
    pub fn viterbi(&mut self) -> Vec<u32> {
        for t in 1..=self.len {
            for k in 0..self.end_nodes[t].len() {
                let idx = self.end_nodes[t][k];
                self.relax(idx);
            }
        }
        self.relax(EOS);
        self.backtrack()
    }

    /// Cumulative score of the path ending at EOS, valid after [`viterbi`](Self::viterbi).
    pub fn best_path_score(&self) -> f64 {
        self.nodes[EOS].backtrace_score
    }

    fn relax(&mut self, idx: usize) {
        let (start, score) = (self.nodes[idx].pos, self.nodes[idx].score);
        let mut best: Option<(usize, f64)> = None;
        for &p in &self.end_nodes[start] {
            let candidate = self.nodes[p].backtrace_score + score;
            // strict: the first predecessor reaching a score keeps it
            if best.map_or(true, |(_, s)| candidate > s) {
                best = Some((p, candidate));
            }
        }
        // unreachable nodes keep prev = None and backtrace_score = 0
        if let Some((p, s)) = best {
            let node = &mut self.nodes[idx];
            node.prev = Some(p);
            node.backtrace_score = s;
        }
    }

    fn backtrack(&self) -> Vec<u32> {
        let mut ids = Vec::new();
        let mut cur = self.nodes[EOS].prev;
        while let Some(i) = cur {
            if i == BOS {
                break;
            }
            let node = &self.nodes[i];
            ids.push(node.id);
            cur = node.prev;
        }
        ids.reverse();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_higher_cumulative_score() {
        // "a"=-1, "b"=-1, "ab"=-1.5 over "ab"
        let mut lattice = Lattice::new(2);
        lattice.insert(0, 1, 1, -1.0).unwrap();
        lattice.insert(0, 2, 3, -1.5).unwrap();
        lattice.insert(1, 1, 2, -1.0).unwrap();
        assert_eq!(lattice.viterbi(), vec![3]);
        assert_eq!(lattice.best_path_score(), -1.5);
    }

    #[test]
    fn splits_when_pieces_score_better() {
        let mut lattice = Lattice::new(2);
        lattice.insert(0, 1, 1, -0.5).unwrap();
        lattice.insert(0, 2, 3, -3.0).unwrap();
        lattice.insert(1, 1, 2, -0.5).unwrap();
        assert_eq!(lattice.viterbi(), vec![1, 2]);
        assert_eq!(lattice.best_path_score(), -1.0);
    }

    #[test]
    fn exact_tie_keeps_first_predecessor() {
        // both "a"+"b" and "ab" reach -2 at position 2; the EOS sees the
        // "ab" node first only if it was inserted first
        let mut lattice = Lattice::new(2);
        lattice.insert(0, 2, 7, -2.0).unwrap();
        lattice.insert(0, 1, 1, -1.0).unwrap();
        lattice.insert(1, 1, 2, -1.0).unwrap();
        assert_eq!(lattice.viterbi(), vec![7]);

        let mut lattice = Lattice::new(2);
        lattice.insert(0, 1, 1, -1.0).unwrap();
        lattice.insert(1, 1, 2, -1.0).unwrap();
        lattice.insert(0, 2, 7, -2.0).unwrap();
        assert_eq!(lattice.viterbi(), vec![1, 2]);
    }

    #[test]
    fn empty_lattice_yields_no_tokens() {
        let mut lattice = Lattice::new(0);
        assert!(lattice.is_empty());
        assert!(lattice.viterbi().is_empty());
    }

    #[test]
    fn unreachable_node_defaults_to_zero() {
        // nothing ends at 1, so the node at [1,2) has no predecessor
        let mut lattice = Lattice::new(2);
        lattice.insert(1, 1, 5, -4.0).unwrap();
        let ids = lattice.viterbi();
        assert_eq!(ids, vec![5]);
        let node = lattice.begin_nodes(1).next().unwrap();
        assert!(node.prev().is_none());
        assert_eq!(node.backtrace_score(), 0.0);
    }

    #[test]
    fn rejects_out_of_bounds_and_empty_spans() {
        let mut lattice = Lattice::new(2);
        assert!(matches!(lattice.insert(1, 2, 1, -1.0), Err(Error::InvalidSpan { pos: 1, length: 2, len: 2 })));
        assert!(matches!(lattice.insert(0, 0, 1, -1.0), Err(Error::InvalidSpan { .. })));
        assert!(matches!(lattice.insert(usize::MAX, 2, 1, -1.0), Err(Error::InvalidSpan { .. })));
        assert_eq!(lattice.nodes().len(), 2);
        lattice.insert(0, 2, 9, -1.0).unwrap();
        assert_eq!(lattice.viterbi(), vec![9]);
    }

    #[test]
    fn records_back_pointers() {
        let mut lattice = Lattice::new(3);
        lattice.insert(0, 1, 1, -1.0).unwrap();
        lattice.insert(1, 2, 2, -1.0).unwrap();
        lattice.viterbi();
        let second = lattice.begin_nodes(1).next().unwrap();
        assert_eq!(second.end(), 3);
        assert_eq!(second.backtrace_score(), -2.0);
        assert_eq!(lattice.nodes()[second.prev().unwrap()].id, 1);
    }
}
