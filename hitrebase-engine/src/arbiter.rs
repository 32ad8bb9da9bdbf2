//! Link arbitration.
//!
//! Upstream links each feed a FIFO. One link is granted per tick in strict
//! round-robin over the enabled links; a granted link with nothing queued
//! leaves the slot empty rather than handing it to another link.

use hitrebase_core::InputWord;
use std::collections::VecDeque;

/// Number of upstream links.
pub const LINK_COUNT: usize = 16;

/// Per-link FIFOs with a round-robin grant pointer.
#[derive(Debug, Clone)]
pub struct LinkArbiter {
    fifos: Vec<VecDeque<InputWord>>,
    pointer: usize,
    dropped: u64,
}

impl Default for LinkArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkArbiter {
    /// Creates empty FIFOs with the pointer before link 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fifos: (0..LINK_COUNT).map(|_| VecDeque::new()).collect(),
            pointer: LINK_COUNT - 1,
            dropped: 0,
        }
    }

    /// Queues a word on its link. Words for disabled links are dropped.
    pub fn push(&mut self, word: InputWord, enabled_links: u16) {
        let link = usize::from(word.link);
        match self.fifos.get_mut(link) {
            Some(fifo) if enabled_links & (1 << link) != 0 => fifo.push_back(word),
            _ => self.dropped += 1,
        }
    }

    /// Grants the next enabled link and pops its head if `ready`.
    pub fn grant(&mut self, enabled_links: u16, ready: bool) -> Option<InputWord> {
        let link = (1..=LINK_COUNT)
            .map(|offset| (self.pointer + offset) % LINK_COUNT)
            .find(|&link| enabled_links & (1 << link) != 0)?;
        self.pointer = link;
        if ready {
            self.fifos[link].pop_front()
        } else {
            None
        }
    }

    /// Words queued on `link`.
    #[must_use]
    pub fn queued(&self, link: u8) -> usize {
        self.fifos.get(usize::from(link)).map_or(0, VecDeque::len)
    }

    /// Words queued on all links.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.fifos.iter().map(VecDeque::len).sum()
    }

    /// Returns true if every FIFO is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fifos.iter().all(VecDeque::is_empty)
    }

    /// Words dropped because their link was disabled.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Empties every FIFO and rewinds the pointer.
    pub fn clear(&mut self) {
        self.fifos.iter_mut().for_each(VecDeque::clear);
        self.pointer = LINK_COUNT - 1;
    }
}
