//! Raw sample sources and the samplers that turn them into binding changes.
//!
//! A backend talks to its hardware (or a network agent) through one of two
//! source shapes:
//!
//! - [`BufferedSource`]: the API queues `(native_offset, raw)` pairs as inputs
//!   change and hands them out in batches.  Every sample is a change.
//! - [`SnapshotSource`]: the API only reports the full current state.  Changes
//!   are found by diffing consecutive snapshots.
//!
//! [`BufferedSampler`] and [`SnapshotSampler`] adapt either shape into a
//! [`DeviceSampler`], the one interface the poll loop drives.  Both are
//! generic over the raw sample type and a normalization function, which is
//! where per-backend behaviour lives.

use std::collections::HashMap;

use crate::domain::descriptor::BindingDescriptor;

use super::error::SourceError;

/// One buffered reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    /// Backend-specific input identifier.
    pub offset: u32,
    pub value: i32,
}

impl RawSample {
    pub const fn new(offset: u32, value: i32) -> Self {
        Self { offset, value }
    }
}

/// A source that queues changes.
#[cfg_attr(test, mockall::automock)]
pub trait BufferedSource: Send + 'static {
    fn acquire(&mut self) -> Result<(), SourceError>;
    fn release(&mut self);
    /// Drains the samples queued since the previous call.
    fn poll_buffered(&mut self) -> Result<Vec<RawSample>, SourceError>;
}

/// A source that reports its full state on demand.
pub trait SnapshotSource: Send + 'static {
    type State: Clone + Send + 'static;

    fn acquire(&mut self) -> Result<(), SourceError>;
    fn release(&mut self);
    fn snapshot(&mut self) -> Result<Self::State, SourceError>;
}

impl<T: BufferedSource + ?Sized> BufferedSource for Box<T> {
    fn acquire(&mut self) -> Result<(), SourceError> {
        (**self).acquire()
    }
    fn release(&mut self) {
        (**self).release();
    }
    fn poll_buffered(&mut self) -> Result<Vec<RawSample>, SourceError> {
        (**self).poll_buffered()
    }
}

impl<T: SnapshotSource + ?Sized> SnapshotSource for Box<T> {
    type State = T::State;

    fn acquire(&mut self) -> Result<(), SourceError> {
        (**self).acquire()
    }
    fn release(&mut self) {
        (**self).release();
    }
    fn snapshot(&mut self) -> Result<T::State, SourceError> {
        (**self).snapshot()
    }
}

/// What the poll loop drives once per tick.
pub trait DeviceSampler: Send + 'static {
    fn acquire(&mut self) -> Result<(), SourceError>;
    fn release(&mut self);
    /// Appends every changed binding with its normalized value to `changes`.
    ///
    /// Returns [`SourceError::Disconnected`] when the device has gone away.
    fn sample(&mut self, changes: &mut Vec<(BindingDescriptor, i16)>) -> Result<(), SourceError>;
}

/// Converts a raw buffered value for a known binding.
pub type BufferedNormalizer = fn(&BindingDescriptor, i32) -> i16;

/// Adapts a [`BufferedSource`] through a fixed offset lookup table.
pub struct BufferedSampler<S> {
    source: S,
    offsets: HashMap<u32, BindingDescriptor>,
    normalize: BufferedNormalizer,
}

impl<S: BufferedSource> BufferedSampler<S> {
    pub fn new(
        source: S,
        offsets: HashMap<u32, BindingDescriptor>,
        normalize: BufferedNormalizer,
    ) -> Self {
        Self {
            source,
            offsets,
            normalize,
        }
    }
}

impl<S: BufferedSource> DeviceSampler for BufferedSampler<S> {
    fn acquire(&mut self) -> Result<(), SourceError> {
        self.source.acquire()
    }

    fn release(&mut self) {
        self.source.release();
    }

    fn sample(&mut self, changes: &mut Vec<(BindingDescriptor, i16)>) -> Result<(), SourceError> {
        for raw in self.source.poll_buffered()? {
            // Offsets the device reports but nobody modelled are ignored.
            if let Some(binding) = self.offsets.get(&raw.offset) {
                changes.push((*binding, (self.normalize)(binding, raw.value)));
            }
        }
        Ok(())
    }
}

/// Reads one normalized binding value out of a snapshot.
pub type SnapshotReader<T> = fn(&T, &BindingDescriptor) -> i16;

/// Adapts a [`SnapshotSource`] by diffing consecutive snapshots.
pub struct SnapshotSampler<S: SnapshotSource> {
    source: S,
    bindings: Vec<BindingDescriptor>,
    read: SnapshotReader<S::State>,
    previous: Option<S::State>,
}

impl<S: SnapshotSource> SnapshotSampler<S> {
    pub fn new(
        source: S,
        bindings: Vec<BindingDescriptor>,
        read: SnapshotReader<S::State>,
    ) -> Self {
        Self {
            source,
            bindings,
            read,
            previous: None,
        }
    }
}

impl<S: SnapshotSource> DeviceSampler for SnapshotSampler<S> {
    fn acquire(&mut self) -> Result<(), SourceError> {
        self.source.acquire()?;
        // The state at acquisition time is the baseline, not a change.
        match self.source.snapshot() {
            Ok(state) => {
                self.previous = Some(state);
                Ok(())
            }
            Err(e) => {
                // Never hand back a source that is still held.
                self.source.release();
                Err(e)
            }
        }
    }

    fn release(&mut self) {
        self.previous = None;
        self.source.release();
    }

    fn sample(&mut self, changes: &mut Vec<(BindingDescriptor, i16)>) -> Result<(), SourceError> {
        let current = self.source.snapshot()?;
        if let Some(previous) = &self.previous {
            for binding in &self.bindings {
                let new = (self.read)(&current, binding);
                if new != (self.read)(previous, binding) {
                    changes.push((*binding, new));
                }
            }
        }
        self.previous = Some(current);
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::normalize;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct QueueSource {
        batches: VecDeque<Result<Vec<RawSample>, SourceError>>,
    }

    impl BufferedSource for QueueSource {
        fn acquire(&mut self) -> Result<(), SourceError> {
            Ok(())
        }
        fn release(&mut self) {}
        fn poll_buffered(&mut self) -> Result<Vec<RawSample>, SourceError> {
            self.batches.pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    struct StateSource {
        states: VecDeque<[i32; 2]>,
        last: [i32; 2],
    }

    impl SnapshotSource for StateSource {
        type State = [i32; 2];
        fn acquire(&mut self) -> Result<(), SourceError> {
            Ok(())
        }
        fn release(&mut self) {}
        fn snapshot(&mut self) -> Result<[i32; 2], SourceError> {
            if let Some(next) = self.states.pop_front() {
                self.last = next;
            }
            Ok(self.last)
        }
    }

    fn normalize_any(binding: &BindingDescriptor, raw: i32) -> i16 {
        match binding.binding_type {
            crate::domain::descriptor::BindingType::Axis => normalize::axis(raw),
            _ => normalize::button(raw),
        }
    }

    fn read_pair(state: &[i32; 2], binding: &BindingDescriptor) -> i16 {
        state[binding.index as usize] as i16
    }

    #[test]
    fn test_buffered_sampler_maps_and_normalizes_known_offsets() {
        // Arrange
        let mut source = QueueSource::default();
        source.batches.push_back(Ok(vec![
            RawSample::new(0, 0),
            RawSample::new(48, 128),
            RawSample::new(999, 1),
        ]));
        let offsets = HashMap::from([
            (0, BindingDescriptor::axis(0)),
            (48, BindingDescriptor::button(0)),
        ]);
        let mut sampler = BufferedSampler::new(source, offsets, normalize_any);
        let mut changes = Vec::new();

        // Act
        sampler.sample(&mut changes).unwrap();

        // Assert
        assert_eq!(
            changes,
            vec![(BindingDescriptor::axis(0), 32767), (BindingDescriptor::button(0), 1)]
        );
    }

    #[test]
    fn test_buffered_sampler_reports_repeated_values_as_changes() {
        let mut source = QueueSource::default();
        source.batches.push_back(Ok(vec![RawSample::new(48, 128), RawSample::new(48, 128)]));
        let offsets = HashMap::from([(48, BindingDescriptor::button(0))]);
        let mut sampler = BufferedSampler::new(source, offsets, normalize_any);
        let mut changes = Vec::new();

        sampler.sample(&mut changes).unwrap();

        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_buffered_sampler_propagates_disconnect() {
        let mut source = QueueSource::default();
        source.batches.push_back(Err(SourceError::Disconnected));
        let mut sampler = BufferedSampler::new(source, HashMap::new(), normalize_any);

        let result = sampler.sample(&mut Vec::new());

        assert_eq!(result, Err(SourceError::Disconnected));
    }

    #[test]
    fn test_buffered_sampler_delegates_acquire_and_release() {
        // Arrange
        let mut source = MockBufferedSource::new();
        source
            .expect_acquire()
            .times(1)
            .returning(|| Err(SourceError::Unavailable("busy".to_string())));
        source.expect_release().times(1).return_const(());
        let mut sampler = BufferedSampler::new(source, HashMap::new(), normalize_any);

        // Act
        let acquired = sampler.acquire();
        sampler.release();

        // Assert
        assert_eq!(acquired, Err(SourceError::Unavailable("busy".to_string())));
    }

    #[test]
    fn test_snapshot_sampler_reports_only_differences() {
        // Arrange
        let source = StateSource {
            states: VecDeque::from([[0, 0], [0, 5], [0, 5], [7, 5]]),
            last: [0, 0],
        };
        let mut sampler = SnapshotSampler::new(
            source,
            vec![BindingDescriptor::axis(0), BindingDescriptor::axis(1)],
            read_pair,
        );
        sampler.acquire().unwrap();

        // Act
        let mut ticks = Vec::new();
        for _ in 0..3 {
            let mut changes = Vec::new();
            sampler.sample(&mut changes).unwrap();
            ticks.push(changes);
        }

        // Assert
        assert_eq!(ticks[0], vec![(BindingDescriptor::axis(1), 5)]);
        assert!(ticks[1].is_empty());
        assert_eq!(ticks[2], vec![(BindingDescriptor::axis(0), 7)]);
    }

    #[derive(Default)]
    struct UnpluggedSource {
        acquired: usize,
        released: usize,
    }

    impl SnapshotSource for UnpluggedSource {
        type State = [i32; 2];
        fn acquire(&mut self) -> Result<(), SourceError> {
            self.acquired += 1;
            Ok(())
        }
        fn release(&mut self) {
            self.released += 1;
        }
        fn snapshot(&mut self) -> Result<[i32; 2], SourceError> {
            Err(SourceError::Disconnected)
        }
    }

    #[test]
    fn test_snapshot_sampler_releases_source_when_baseline_fails() {
        // Arrange
        let mut sampler = SnapshotSampler::new(UnpluggedSource::default(), vec![BindingDescriptor::axis(0)], read_pair);

        // Act
        let first = sampler.acquire();
        let second = sampler.acquire();

        // Assert
        assert_eq!(first, Err(SourceError::Disconnected));
        assert_eq!(second, Err(SourceError::Disconnected));
        assert_eq!(sampler.source.acquired, 2);
        assert_eq!(sampler.source.released, 2);
    }

    #[test]
    fn test_snapshot_sampler_baseline_is_not_a_change() {
        let source = StateSource {
            states: VecDeque::from([[3, 3]]),
            last: [0, 0],
        };
        let mut sampler = SnapshotSampler::new(source, vec![BindingDescriptor::axis(0)], read_pair);
        sampler.acquire().unwrap();

        let mut changes = Vec::new();
        sampler.sample(&mut changes).unwrap();

        assert!(changes.is_empty());
    }
}
