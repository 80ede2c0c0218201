//! Ordered element sequence - the flat "what comes next" order of a routine
//!
//! Built from blocks and sub-blocks in `order`, never from display order.
//! The session controller owns one and rebuilds it whenever it swaps the tree.

use std::collections::HashMap;

use super::{ElementRef, Routine};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementSequence {
    elements: Vec<ElementRef>,
    positions: HashMap<ElementRef, usize>,
}

impl ElementSequence {
    pub fn build(routine: &Routine) -> Self {
        let mut elements = Vec::new();
        let mut positions = HashMap::new();

        for sub_block in routine.sub_blocks() {
            for element in sub_block.elements() {
                if positions.contains_key(&element) {
                    continue;
                }
                positions.insert(element.clone(), elements.len());
                elements.push(element);
            }
        }

        Self { elements, positions }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementRef> {
        self.elements.iter()
    }

    pub fn contains(&self, element: &ElementRef) -> bool {
        self.positions.contains_key(element)
    }

    pub fn position(&self, element: &ElementRef) -> Option<usize> {
        self.positions.get(element).copied()
    }

    /// Element immediately after `element`, if any
    pub fn next_after(&self, element: &ElementRef) -> Option<&ElementRef> {
        let pos = self.position(element)?;
        self.elements.get(pos + 1)
    }

    pub fn is_last(&self, element: &ElementRef) -> bool {
        self.position(element)
            .is_some_and(|pos| pos + 1 == self.elements.len())
    }

    /// First element after `element` matching `pred`
    pub fn first_after_where(
        &self,
        element: &ElementRef,
        mut pred: impl FnMut(&ElementRef) -> bool,
    ) -> Option<&ElementRef> {
        let pos = self.position(element)?;
        self.elements[pos + 1..].iter().find(|el| pred(el))
    }

    /// First element matching `pred`, in sequence order
    pub fn first_where(&self, mut pred: impl FnMut(&ElementRef) -> bool) -> Option<&ElementRef> {
        self.elements.iter().find(|el| pred(el))
    }
}
