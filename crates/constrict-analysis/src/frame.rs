//! Abstract execution frames
//!
//! An [`AbstractFrame`] models the operand stack and local variables of one
//! program point. It is generic over the tracked value so the fixpoint driver
//! stays independent of any particular lattice.

use rustc_hash::FxHashMap;

/// Raised when two control-flow paths meet with different stack depths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackDepthMismatch {
    /// Depth of the receiving frame
    pub left: usize,
    /// Depth of the incoming frame
    pub right: usize,
}

/// Abstract operand stack and local variables at one program point
#[derive(Debug, Clone, PartialEq)]
pub struct AbstractFrame<T> {
    stack: Vec<T>,
    locals: FxHashMap<u16, T>,
}

impl<T: Clone + PartialEq> AbstractFrame<T> {
    /// Entry frame: empty stack, `local_count` locals all set to `initial`
    pub fn entry(local_count: usize, initial: T) -> Self {
        let mut locals = FxHashMap::default();
        for index in 0..local_count {
            locals.insert(index as u16, initial.clone());
        }
        Self {
            stack: Vec::new(),
            locals,
        }
    }

    /// Push a value onto the operand stack
    pub fn push(&mut self, value: T) {
        self.stack.push(value);
    }

    /// Pop the top of the operand stack
    pub fn pop(&mut self) -> Option<T> {
        self.stack.pop()
    }

    /// Value at the given depth from the top of the stack (0 is the top)
    pub fn operand(&self, depth: usize) -> Option<&T> {
        let len = self.stack.len();
        if depth < len {
            self.stack.get(len - depth - 1)
        } else {
            None
        }
    }

    /// Current stack depth
    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Drop all stack values, e.g. on entry to an exception handler
    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    /// Value of a local variable
    pub fn local(&self, index: u16) -> Option<&T> {
        self.locals.get(&index)
    }

    /// Set a local variable
    pub fn set_local(&mut self, index: u16, value: T) {
        self.locals.insert(index, value);
    }

    /// Pointwise merge with another frame
    ///
    /// Stacks must have the same depth; locals are merged where both frames
    /// track the slot.
    pub fn merge(
        &self,
        other: &Self,
        mut join: impl FnMut(&T, &T) -> T,
    ) -> Result<Self, StackDepthMismatch> {
        if self.stack.len() != other.stack.len() {
            return Err(StackDepthMismatch {
                left: self.stack.len(),
                right: other.stack.len(),
            });
        }
        let stack = self
            .stack
            .iter()
            .zip(&other.stack)
            .map(|(a, b)| join(a, b))
            .collect();
        let mut locals = FxHashMap::default();
        for (index, value) in &self.locals {
            if let Some(incoming) = other.locals.get(index) {
                locals.insert(*index, join(value, incoming));
            }
        }
        Ok(Self { stack, locals })
    }

    /// Rewrite every slot (stack and locals) the mapper claims
    ///
    /// The mapper returns `Some(replacement)` for slots it wants to change.
    /// Used to propagate array updates to aliases and to invalidate values
    /// that escape the analyzed frame.
    pub fn rewrite(&mut self, mut mapper: impl FnMut(&T) -> Option<T>) {
        for slot in &mut self.stack {
            if let Some(replacement) = mapper(slot) {
                *slot = replacement;
            }
        }
        for slot in self.locals.values_mut() {
            if let Some(replacement) = mapper(slot) {
                *slot = replacement;
            }
        }
    }
}
