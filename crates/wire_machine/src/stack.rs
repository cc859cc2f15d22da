use heapless::Vec;

use crate::MachineError;

/// Bounded LIFO of one byte cells holding opcodes and their operands.
///
/// Besides the cells themselves the stack keeps two diagnostics: a copy of
/// its contents every time it reaches a new high-water mark, and a copy of
/// the contents at the first push that did not fit. Neither is cleared by
/// [`OpStack::clear`], so they survive across sessions until
/// [`OpStack::reset_diagnostics`] is called.
#[derive(Debug, Clone)]
pub struct OpStack<const STACK_SIZE: usize> {
    cells: Vec<u8, STACK_SIZE>,
    high_tide: usize,
    high_tide_snapshot: Vec<u8, STACK_SIZE>,
    overflow_snapshot: Option<Vec<u8, STACK_SIZE>>,
    overflows: u16,
}

impl<const STACK_SIZE: usize> OpStack<STACK_SIZE> {
    pub const fn new() -> Self {
        Self {
            cells: Vec::new(),
            high_tide: 0,
            high_tide_snapshot: Vec::new(),
            overflow_snapshot: None,
            overflows: 0,
        }
    }

    /// Pushes one cell. A full stack is left untouched and the push is
    /// reported as [`MachineError::StackOverflow`].
    pub fn push(&mut self, cell: u8) -> Result<(), MachineError> {
        if self.cells.push(cell).is_err() {
            self.overflows = self.overflows.saturating_add(1);
            if self.overflow_snapshot.is_none() {
                self.overflow_snapshot = Some(self.cells.clone());
            }
            warn!("stack overflow, dropped cell {=u8}: {=[u8]}", cell, self.cells.as_slice());
            return Err(MachineError::StackOverflow);
        }

        if self.cells.len() >= self.high_tide {
            self.high_tide = self.cells.len();
            self.high_tide_snapshot = self.cells.clone();
        }
        Ok(())
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.cells.pop()
    }

    /// Drops every pending cell. Diagnostics are kept.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        STACK_SIZE
    }

    /// Cells bottom to top.
    pub fn as_slice(&self) -> &[u8] {
        self.cells.as_slice()
    }

    pub fn high_tide(&self) -> usize {
        self.high_tide
    }

    pub fn high_tide_snapshot(&self) -> &[u8] {
        self.high_tide_snapshot.as_slice()
    }

    pub fn overflow_snapshot(&self) -> Option<&[u8]> {
        self.overflow_snapshot.as_ref().map(|cells| cells.as_slice())
    }

    pub fn overflows(&self) -> u16 {
        self.overflows
    }

    pub fn reset_diagnostics(&mut self) {
        self.high_tide = self.cells.len();
        self.high_tide_snapshot = self.cells.clone();
        self.overflow_snapshot = None;
        self.overflows = 0;
    }

    pub fn report(&self) -> StackReport<STACK_SIZE> {
        StackReport {
            depth: self.cells.len(),
            high_tide: self.high_tide,
            high_tide_snapshot: self.high_tide_snapshot.clone(),
            overflow_snapshot: self.overflow_snapshot.clone(),
            overflows: self.overflows,
        }
    }
}

impl<const STACK_SIZE: usize> Default for OpStack<STACK_SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the stack diagnostics that can leave the critical section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackReport<const STACK_SIZE: usize> {
    pub depth: usize,
    pub high_tide: usize,
    pub high_tide_snapshot: Vec<u8, STACK_SIZE>,
    pub overflow_snapshot: Option<Vec<u8, STACK_SIZE>>,
    pub overflows: u16,
}

impl<const STACK_SIZE: usize> StackReport<STACK_SIZE> {
    /// Writes the report to the log, one line per snapshot.
    pub fn log(&self) {
        debug!(
            "stack depth {=usize}, high tide {=usize}: {=[u8]}",
            self.depth,
            self.high_tide,
            self.high_tide_snapshot.as_slice()
        );
        if let Some(snapshot) = &self.overflow_snapshot {
            warn!(
                "{=u16} overflows, first at: {=[u8]}",
                self.overflows,
                snapshot.as_slice()
            );
        }
    }
}
