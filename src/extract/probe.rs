// src/extract/probe.rs
//! Try candidates in priority order, return the first one that produces a
//! value. A miss reports every label that was tried so the caller can say
//! exactly which probes failed.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeMiss {
    pub tried: Vec<String>,
}

impl fmt::Display for ProbeMiss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no probe matched (tried: {})", self.tried.join(", "))
    }
}

impl std::error::Error for ProbeMiss {}

#[derive(Debug, Clone, PartialEq)]
pub struct Probed<C, T> {
    pub candidate: C,
    pub value: T,
    /// Candidates that were tried and missed before this one.
    pub missed: Vec<String>,
}

pub fn first_success<C, T, I, L, F>(
    candidates: I,
    label: L,
    mut attempt: F,
) -> Result<Probed<C, T>, ProbeMiss>
where
    I: IntoIterator<Item = C>,
    L: Fn(&C) -> String,
    F: FnMut(&C) -> Option<T>,
{
    let mut tried = Vec::new();
    for candidate in candidates {
        match attempt(&candidate) {
            Some(value) => {
                return Ok(Probed {
                    candidate,
                    value,
                    missed: tried,
                })
            }
            None => tried.push(label(&candidate)),
        }
    }
    Err(ProbeMiss { tried })
}
