//! Dictionary automaton over label sequences.
//!
//! Built with rustfst (epsilon removal, determinization, minimization) and then
//! frozen into a label-sorted transition table so lookups during decoding are a
//! binary search over a state's arcs.

use rustfst::algorithms::determinize::determinize;
use rustfst::algorithms::minimize;
use rustfst::algorithms::rm_epsilon::rm_epsilon;
use rustfst::prelude::*;

pub type AutomatonState = u32;

#[derive(thiserror::Error, Debug)]
pub enum AutomatonError {
    #[error("automaton construction failed: {0}")]
    Build(String),
    #[error("serialized automaton truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("serialized automaton references missing state {0}")]
    BadState(u32),
}

fn build_err(e: impl std::fmt::Display) -> AutomatonError {
    AutomatonError::Build(e.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordAutomaton {
    start: AutomatonState,
    accepting: Vec<bool>,
    arcs: Vec<Vec<(u32, AutomatonState)>>,
}

impl WordAutomaton {
    /// Builds the minimal deterministic acceptor of `words`. Label `0` is the
    /// epsilon label and must not appear in any word.
    pub fn build<I, W>(words: I) -> Result<Self, AutomatonError>
    where
        I: IntoIterator<Item = W>,
        W: AsRef<[u32]>,
    {
        let mut fst = VectorFst::<TropicalWeight>::new();
        let start = fst.add_state();
        fst.set_start(start).map_err(build_err)?;

        let mut inserted = 0usize;
        for word in words {
            let labels = word.as_ref();
            if labels.is_empty() {
                continue;
            }
            let mut src = start;
            for &label in labels {
                let dst = fst.add_state();
                fst.add_tr(src, Tr::new(label, label, TropicalWeight::one(), dst))
                    .map_err(build_err)?;
                src = dst;
            }
            fst.set_final(src, TropicalWeight::one()).map_err(build_err)?;
            inserted += 1;
        }

        if inserted == 0 {
            return Ok(Self::empty());
        }

        rm_epsilon(&mut fst).map_err(build_err)?;
        let mut dfa: VectorFst<TropicalWeight> = determinize(&fst).map_err(build_err)?;
        minimize(&mut dfa).map_err(build_err)?;

        let automaton = Self::freeze(&dfa)?;
        log::debug!(
            "Built dictionary automaton: {} words, {} states",
            inserted,
            automaton.num_states()
        );
        Ok(automaton)
    }

    fn empty() -> Self {
        Self {
            start: 0,
            accepting: vec![false],
            arcs: vec![Vec::new()],
        }
    }

    fn freeze(fst: &VectorFst<TropicalWeight>) -> Result<Self, AutomatonError> {
        let start = fst
            .start()
            .ok_or_else(|| AutomatonError::Build("automaton has no start state".to_string()))?;
        let num_states = fst.num_states();
        let mut accepting = Vec::with_capacity(num_states);
        let mut arcs = Vec::with_capacity(num_states);
        for state in 0..num_states as StateId {
            accepting.push(fst.is_final(state).map_err(build_err)?);
            let trs = fst.get_trs(state).map_err(build_err)?;
            let mut out: Vec<(u32, AutomatonState)> = trs
                .trs()
                .iter()
                .map(|tr| (tr.ilabel, tr.nextstate))
                .collect();
            out.sort_unstable();
            arcs.push(out);
        }
        Ok(Self {
            start,
            accepting,
            arcs,
        })
    }

    pub fn start_state(&self) -> AutomatonState {
        self.start
    }

    pub fn num_states(&self) -> usize {
        self.accepting.len()
    }

    pub fn is_accepting(&self, state: AutomatonState) -> bool {
        self.accepting.get(state as usize).copied().unwrap_or(false)
    }

    pub fn transition(&self, state: AutomatonState, label: u32) -> Option<AutomatonState> {
        let arcs = self.arcs.get(state as usize)?;
        arcs.binary_search_by_key(&label, |&(l, _)| l)
            .ok()
            .map(|i| arcs[i].1)
    }

    /// Whether the whole sequence is a path from the start state to an accepting state.
    pub fn accepts(&self, labels: &[u32]) -> bool {
        labels
            .iter()
            .try_fold(self.start, |state, &label| self.transition(state, label))
            .is_some_and(|state| self.is_accepting(state))
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.accepting.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.start.to_le_bytes());
        for (accepting, arcs) in self.accepting.iter().zip(&self.arcs) {
            out.push(u8::from(*accepting));
            out.extend_from_slice(&(arcs.len() as u32).to_le_bytes());
            for &(label, next) in arcs {
                out.extend_from_slice(&label.to_le_bytes());
                out.extend_from_slice(&next.to_le_bytes());
            }
        }
    }

    /// Reads an automaton written by [`WordAutomaton::write_to`], returning it
    /// with the number of bytes consumed.
    pub fn read_from(buffer: &[u8]) -> Result<(Self, usize), AutomatonError> {
        let mut reader = Reader { buffer, offset: 0 };
        let num_states = reader.read_u32()?;
        let start = reader.read_u32()?;
        if start >= num_states {
            return Err(AutomatonError::BadState(start));
        }

        let mut accepting = Vec::with_capacity(num_states.min(1 << 20) as usize);
        let mut arcs = Vec::with_capacity(num_states.min(1 << 20) as usize);
        for _ in 0..num_states {
            accepting.push(reader.read_u8()? != 0);
            let num_arcs = reader.read_u32()?;
            let mut out = Vec::with_capacity(num_arcs.min(1 << 16) as usize);
            for _ in 0..num_arcs {
                let label = reader.read_u32()?;
                let next = reader.read_u32()?;
                if next >= num_states {
                    return Err(AutomatonError::BadState(next));
                }
                out.push((label, next));
            }
            out.sort_unstable();
            arcs.push(out);
        }

        Ok((
            Self {
                start,
                accepting,
                arcs,
            },
            reader.offset,
        ))
    }
}

struct Reader<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], AutomatonError> {
        let bytes = self
            .buffer
            .get(self.offset..)
            .and_then(|rest| rest.get(..N))
            .ok_or(AutomatonError::Truncated {
                offset: self.offset,
            })?;
        self.offset += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, AutomatonError> {
        Ok(self.take::<1>()?[0])
    }

    fn read_u32(&mut self) -> Result<u32, AutomatonError> {
        self.take::<4>().map(u32::from_le_bytes)
    }
}
