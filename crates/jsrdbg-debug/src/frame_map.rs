use std::collections::BTreeMap;

use jsrdbg_wire::{ContextId, WireStackFrame};

use crate::error::{DebugError, DebugResult};
use crate::pairing::{pair, unpair};

/// A wire frame with its session-wide id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    pub id: u64,
    pub context_id: ContextId,
    pub depth: u32,
    pub line: u32,
    pub url: String,
}

/// Frames of every paused context, keyed by `pair(context_id, depth)`.
#[derive(Debug, Default)]
pub struct FrameMap {
    frames: BTreeMap<u64, StackFrame>,
}

impl FrameMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frames(
        &mut self,
        context_id: ContextId,
        frames: &[WireStackFrame],
    ) -> DebugResult<Vec<StackFrame>> {
        frames
            .iter()
            .map(|frame| {
                let depth = u64::from(frame.depth);
                let id = pair(context_id, depth)
                    .ok_or(DebugError::IdSpaceExhausted(context_id, depth))?;
                let mapped = StackFrame {
                    id,
                    context_id,
                    depth: frame.depth,
                    line: frame.line,
                    url: frame.url.clone(),
                };
                self.frames.insert(id, mapped.clone());
                Ok(mapped)
            })
            .collect()
    }

    pub fn get_stack_frame(&self, frame_id: u64) -> DebugResult<&StackFrame> {
        self.frames
            .get(&frame_id)
            .ok_or(DebugError::UnknownFrame(frame_id))
    }

    /// Frames of one context, innermost first.
    pub fn get_stack_frames_from_context(&self, context_id: ContextId) -> Vec<&StackFrame> {
        let mut frames: Vec<_> = self
            .frames
            .iter()
            .filter(|(id, _)| unpair(**id).0 == context_id)
            .map(|(_, frame)| frame)
            .collect();
        frames.sort_by_key(|frame| frame.depth);
        frames
    }

    /// Forget a context's frames, e.g. after it resumes.
    pub fn remove_context(&mut self, context_id: ContextId) {
        self.frames.retain(|id, _| unpair(*id).0 != context_id);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(depth: u32, line: u32) -> WireStackFrame {
        WireStackFrame {
            depth,
            line,
            url: "main".to_owned(),
        }
    }

    #[test]
    fn frame_ids_are_unique_across_contexts() {
        let mut map = FrameMap::new();
        let a = map.add_frames(1, &[wire(0, 10), wire(1, 20)]).unwrap();
        let b = map.add_frames(2, &[wire(0, 30)]).unwrap();

        assert_eq!(a[0].id, pair(1, 0).unwrap());
        assert_eq!(a[1].id, pair(1, 1).unwrap());
        assert_eq!(b[0].id, pair(2, 0).unwrap());
        assert_ne!(a[1].id, b[0].id);
        assert_eq!(map.len(), 3);
        assert_eq!(map.get_stack_frame(b[0].id).unwrap().line, 30);
    }

    #[test]
    fn frames_are_grouped_by_context() {
        let mut map = FrameMap::new();
        map.add_frames(3, &[wire(0, 1), wire(1, 2), wire(2, 3)]).unwrap();
        map.add_frames(4, &[wire(0, 9)]).unwrap();

        let depths: Vec<_> = map
            .get_stack_frames_from_context(3)
            .into_iter()
            .map(|frame| frame.depth)
            .collect();
        assert_eq!(depths, vec![0, 1, 2]);

        map.remove_context(3);
        assert!(map.get_stack_frames_from_context(3).is_empty());
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn missing_frame_is_an_error() {
        let map = FrameMap::new();
        assert!(matches!(map.get_stack_frame(42), Err(DebugError::UnknownFrame(42))));
    }
}
