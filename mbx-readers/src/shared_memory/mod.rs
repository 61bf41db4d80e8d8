//! Shared-memory minibatch channel
//!
//! The producer owns one named mapping per stream plus four named signals; the
//! consumer opens them (never creates them) and drives the protocol:
//!
//! 1. at epoch start, raise reset-announce and wait for reset-done;
//! 2. per retrieval, check every buffer's version, raise request, wait for
//!    response, then read the rows-written counters, which must agree;
//! 3. a round of zero rows ends the epoch, after which one more request tells
//!    the producer the channel is drained.

mod buffer;
mod dump;
mod options;
mod reader;
mod signal;

pub use buffer::SharedBuffer;
pub use dump::DiagnosticDump;
pub use options::{
    default_mapping_dir, ChannelNames, DataAccess, SharedMemoryReaderOptions, MAPPING_PREFIX,
    REQUEST_SIGNAL_PREFIX, RESET_ANNOUNCE_SIGNAL_PREFIX, RESET_DONE_SIGNAL_PREFIX,
    RESPONSE_SIGNAL_PREFIX,
};
pub use reader::{EpochStats, ReaderState, SharedMemoryReader, READER_VERSION};
pub use signal::{CrossProcessSignal, SignalOpener};

#[cfg(unix)]
pub use signal::{NamedSemaphore, NamedSemaphoreOpener};

#[cfg(test)]
mod tests {
    use super::signal::MockCrossProcessSignal;
    use super::*;
    use crate::error::Error;
    use crate::loopback::{unique_namespace, LocalSignalHub, LoopbackProducer, Minibatch, ProducerSignals};
    use mbx_core::{EpochConfiguration, EpochSize, ReaderConfiguration, SequenceEnumerator, StreamDescriptor};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use test_case::test_case;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("mbx_readers=debug")
            .try_init();
    }

    struct Channel {
        dir: TempDir,
        hub: LocalSignalHub,
        options: SharedMemoryReaderOptions,
    }

    impl Channel {
        fn new(widths: &[usize]) -> Self {
            init_tracing();
            let dir = tempfile::tempdir().unwrap();
            let streams = widths
                .iter()
                .enumerate()
                .map(|(i, &width)| StreamDescriptor::dense(format!("stream{i}"), ["F", "L", "W"][i], width))
                .collect();
            let options = SharedMemoryReaderOptions::new(unique_namespace(), streams)
                .with_mapping_dir(dir.path());

            Self {
                dir,
                hub: LocalSignalHub::new(),
                options,
            }
        }

        fn producer(&self, minibatch_size: usize) -> LoopbackProducer {
            LoopbackProducer::create(&self.hub, &self.options, minibatch_size).unwrap()
        }

        fn reader(&self) -> SharedMemoryReader {
            SharedMemoryReader::with_signal_opener(self.options.clone(), &self.hub).unwrap()
        }

        fn configured_reader(&self, minibatch_size: usize) -> SharedMemoryReader {
            let mut reader = self.reader();
            reader.set_configuration(&configuration(minibatch_size)).unwrap();
            reader
        }
    }

    fn configuration(minibatch_size: usize) -> ReaderConfiguration {
        ReaderConfiguration {
            minibatch_size_in_samples: minibatch_size,
            ..Default::default()
        }
    }

    /// Read one epoch to its end, returning the row count of every batch
    fn drain_epoch(reader: &mut SharedMemoryReader, minibatch_size: usize) -> Vec<usize> {
        let mut rows = Vec::new();
        loop {
            let batch = reader.next_sequences(minibatch_size, minibatch_size).unwrap();
            if batch.end_of_epoch {
                return rows;
            }
            rows.push(batch.num_rows());
        }
    }

    #[test]
    fn test_full_round_then_end_of_epoch() {
        let channel = Channel::new(&[4]);
        let epoch = vec![Minibatch::synthetic(&[4], 8, 0)];
        let producer = channel.producer(8).spawn(vec![epoch.clone()]);
        let mut reader = channel.configured_reader(8);
        assert_eq!(reader.state(), ReaderState::AwaitingEpochStart);

        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();
        assert_eq!(reader.state(), ReaderState::EpochActive);

        let batch = reader.next_sequences(8, 8).unwrap();
        assert!(!batch.end_of_epoch);
        assert_eq!(batch.num_rows(), 8);
        let rows = batch.stream(0).unwrap();
        assert!(rows[0].is_borrowed());
        assert_eq!(rows[3].data(), epoch[0].streams[0][3].as_slice());
        assert_eq!(rows[3].sample_layout().num_elements(), 4);
        assert_eq!(rows[3].number_of_samples(), 1);

        let end = reader.next_sequences(8, 8).unwrap();
        assert!(end.end_of_epoch);
        assert_eq!(end.num_rows(), 0);

        assert_eq!(reader.samples_per_epoch(), Some(8));
        assert_eq!(reader.current_sample_position(), 8);
        assert_eq!(reader.state(), ReaderState::AwaitingEpochStart);

        let stats = reader.last_epoch_stats().unwrap();
        assert_eq!(stats.samples, 8);
        assert_eq!(stats.minibatches, 1);
        assert!(stats.total >= stats.reader_inclusive);
        assert!(stats.reader_inclusive >= stats.reader_exclusive);

        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_zero_rows_end_epoch_after_partial_rounds() {
        let channel = Channel::new(&[2]);
        let epochs = vec![
            vec![Minibatch::synthetic(&[2], 8, 0), Minibatch::synthetic(&[2], 3, 1)],
            vec![Minibatch::synthetic(&[2], 8, 2), Minibatch::synthetic(&[2], 3, 3)],
        ];
        let producer = channel.producer(8).spawn(epochs);
        let mut reader = channel.configured_reader(8);

        for epoch_index in 0..2 {
            reader.start_epoch(&EpochConfiguration::full_sweep(8, epoch_index)).unwrap();
            assert_eq!(drain_epoch(&mut reader, 8), vec![8, 3]);
        }

        assert_eq!(reader.samples_per_epoch(), Some(11));
        assert_eq!(reader.current_sample_position(), 11 + 11);
        assert_eq!(
            reader.epoch_configuration().total_epoch_size,
            EpochSize::Samples(11)
        );
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_copied_rows_outlive_the_round() {
        let mut channel = Channel::new(&[3, 1]);
        channel.options.data_access = DataAccess::Copied;
        let first = Minibatch::synthetic(&[3, 1], 4, 0);
        let second = Minibatch::synthetic(&[3, 1], 4, 1);
        let producer = channel.producer(4).spawn(vec![vec![first.clone(), second.clone()]]);
        let mut reader = channel.configured_reader(4);
        reader.start_epoch(&EpochConfiguration::full_sweep(4, 0)).unwrap();

        let kept = reader.next_sequences(4, 4).unwrap().into_owned();
        let next = reader.next_sequences(4, 4).unwrap();
        assert!(!next.stream(1).unwrap()[0].is_borrowed());
        assert_eq!(next.stream(1).unwrap()[2].data(), second.streams[1][2].as_slice());

        for stream in 0..2 {
            for (row, data) in kept.stream(stream).unwrap().iter().enumerate() {
                assert_eq!(data.data(), first.streams[stream][row].as_slice());
            }
        }

        assert_eq!(drain_epoch(&mut reader, 4), Vec::<usize>::new());
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_epoch_size_divergence_is_fatal() {
        let channel = Channel::new(&[4]);
        let epochs = vec![
            vec![Minibatch::synthetic(&[4], 8, 0)],
            vec![Minibatch::synthetic(&[4], 8, 1), Minibatch::synthetic(&[4], 1, 2)],
        ];
        // The producer is left waiting for the drain request
        let _producer = channel.producer(8).spawn(epochs);
        let mut reader = channel.configured_reader(8);

        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();
        assert_eq!(drain_epoch(&mut reader, 8), vec![8]);

        reader.start_epoch(&EpochConfiguration::full_sweep(8, 1)).unwrap();
        assert_eq!(reader.next_sequences(8, 8).unwrap().num_rows(), 8);
        assert_eq!(reader.next_sequences(8, 8).unwrap().num_rows(), 1);

        let result = reader.next_sequences(8, 8);
        assert!(matches!(
            result,
            Err(Error::EpochSizeDivergence { observed: 9, baseline: 8, .. })
        ));
        assert_eq!(reader.state(), ReaderState::Terminal);

        let after = reader.start_epoch(&EpochConfiguration::full_sweep(8, 2));
        match after {
            Err(Error::Terminated(message)) => assert!(message.contains("(9)")),
            other => panic!("expected a terminated reader, got {other:?}"),
        }
    }

    #[test]
    fn test_small_epoch_size_drift_is_tolerated() {
        let channel = Channel::new(&[1]);
        let epochs = vec![
            vec![
                Minibatch::synthetic(&[1], 8, 0),
                Minibatch::synthetic(&[1], 8, 1),
                Minibatch::synthetic(&[1], 4, 2),
            ],
            vec![
                Minibatch::synthetic(&[1], 8, 3),
                Minibatch::synthetic(&[1], 8, 4),
                Minibatch::synthetic(&[1], 3, 5),
            ],
        ];
        let producer = channel.producer(8).spawn(epochs);
        let mut reader = channel.configured_reader(8);

        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();
        assert_eq!(drain_epoch(&mut reader, 8), vec![8, 8, 4]);
        reader.start_epoch(&EpochConfiguration::full_sweep(8, 1)).unwrap();
        assert_eq!(drain_epoch(&mut reader, 8), vec![8, 8, 3]);

        assert_eq!(reader.samples_per_epoch(), Some(20));
        assert_eq!(reader.last_epoch_stats().unwrap().samples, 19);
        assert_eq!(reader.state(), ReaderState::AwaitingEpochStart);
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_misaligned_position_is_fatal() {
        let channel = Channel::new(&[4]);
        let _producer = channel.producer(8).spawn(vec![vec![Minibatch::synthetic(&[4], 8, 0)]]);
        let mut reader = channel.configured_reader(8);
        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();
        drain_epoch(&mut reader, 8);

        let result = reader.set_current_sample_position(4);
        assert!(matches!(
            result,
            Err(Error::MisalignedPosition { position: 4, epoch_size: 8 })
        ));
        assert_eq!(reader.state(), ReaderState::Terminal);
    }

    #[test]
    fn test_aligned_position_restarts_at_epoch() {
        let channel = Channel::new(&[4]);
        let epoch = vec![Minibatch::synthetic(&[4], 8, 0)];
        let producer = channel.producer(8).spawn(vec![epoch.clone(), epoch]);
        let mut reader = channel.configured_reader(8);
        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();
        drain_epoch(&mut reader, 8);

        reader.set_current_sample_position(16).unwrap();
        assert_eq!(reader.state(), ReaderState::EpochActive);
        assert_eq!(reader.epoch_configuration().epoch_index, 2);
        assert_eq!(reader.current_sample_position(), 16);

        assert_eq!(drain_epoch(&mut reader, 8), vec![8]);
        assert_eq!(reader.current_sample_position(), 24);
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_position_saturates_at_huge_epoch_index() {
        let channel = Channel::new(&[4]);
        let epoch = vec![Minibatch::synthetic(&[4], 8, 0)];
        let producer = channel.producer(8).spawn(vec![epoch.clone(), epoch]);
        let mut reader = channel.configured_reader(8);
        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();
        drain_epoch(&mut reader, 8);

        reader
            .start_epoch(&EpochConfiguration::full_sweep(8, usize::MAX / 2))
            .unwrap();
        assert_eq!(reader.current_sample_position(), usize::MAX);

        assert_eq!(drain_epoch(&mut reader, 8), vec![8]);
        assert_eq!(reader.current_sample_position(), usize::MAX);
        producer.join().unwrap().unwrap();
    }

    #[test]
    fn test_position_before_epoch_size_is_known() {
        let channel = Channel::new(&[4]);
        let _producer = channel.producer(8);
        let mut reader = channel.configured_reader(8);

        let result = reader.set_current_sample_position(8);
        assert!(matches!(
            result,
            Err(Error::MisalignedPosition { position: 8, epoch_size: 0 })
        ));
    }

    #[test_case(0, 8, "Global" ; "zero global count")]
    #[test_case(8, 0, "Local" ; "zero local count")]
    fn test_zero_sample_count_is_fatal(global: usize, local: usize, expected: &str) {
        let channel = Channel::new(&[4]);
        let _producer = channel.producer(8);
        let mut reader = channel.configured_reader(8);

        match reader.next_sequences(global, local) {
            Err(Error::ZeroSampleCount { which }) => assert_eq!(which, expected),
            other => panic!("expected a zero count error, got {other:?}"),
        }
        assert_eq!(reader.state(), ReaderState::Terminal);
    }

    #[test]
    fn test_multiple_workers_are_rejected() {
        let channel = Channel::new(&[4]);
        let _producer = channel.producer(8);
        let mut reader = channel.reader();

        let config = ReaderConfiguration {
            number_of_workers: 2,
            worker_rank: 1,
            minibatch_size_in_samples: 8,
        };
        assert!(matches!(
            reader.set_configuration(&config),
            Err(Error::MultipleWorkers { workers: 2 })
        ));
        assert_eq!(reader.minibatch_size(), None);
        assert!(matches!(
            reader.set_configuration(&configuration(8)),
            Err(Error::Terminated(_))
        ));
    }

    #[test]
    fn test_version_gap_is_fatal() {
        let channel = Channel::new(&[4]);
        let mut producer = channel.producer(8);
        let mut reader = channel.configured_reader(8);

        let skipping = std::thread::spawn(move || {
            producer.accept_epoch_start().unwrap();
            producer.signals().request.wait_for_signal().unwrap();
            producer.buffers_mut()[0].set_header(2, 8).unwrap();
            producer.signals().response.set_signal().unwrap();
        });

        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();
        assert_eq!(reader.next_sequences(8, 8).unwrap().num_rows(), 8);
        skipping.join().unwrap();

        assert!(matches!(
            reader.next_sequences(8, 8),
            Err(Error::VersionMismatch { expected: 1, actual: 2, .. })
        ));
        assert_eq!(reader.state(), ReaderState::Terminal);
    }

    #[test_case(8, 7 ; "short second stream")]
    #[test_case(0, 5 ; "empty first stream")]
    fn test_row_count_disagreement_is_fatal(first: usize, second: usize) {
        let channel = Channel::new(&[2, 1]);
        let mut minibatch = Minibatch::synthetic(&[2, 1], 8, 0);
        minibatch.streams[0].truncate(first);
        minibatch.streams[1].truncate(second);

        let mut producer = channel.producer(8);
        let serving = std::thread::spawn(move || {
            producer.accept_epoch_start().unwrap();
            producer.serve_round(&minibatch).unwrap();
        });

        let mut reader = channel.configured_reader(8);
        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();

        let result = reader.next_sequences(8, 8);
        serving.join().unwrap();
        match result {
            Err(Error::RowCountDisagreement { written, expected, .. }) => {
                assert_eq!(written as usize, second);
                assert_eq!(expected as usize, first);
            }
            other => panic!("expected a disagreement, got {other:?}"),
        }
        assert_eq!(reader.state(), ReaderState::Terminal);
    }

    #[test]
    fn test_capacity_overrun_is_fatal() {
        let channel = Channel::new(&[4]);
        let mut producer = channel.producer(8);
        let overrunning = std::thread::spawn(move || {
            producer.accept_epoch_start().unwrap();
            producer.signals().request.wait_for_signal().unwrap();
            producer.buffers_mut()[0].publish(9).unwrap();
            producer.signals().response.set_signal().unwrap();
        });

        let mut reader = channel.configured_reader(8);
        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();

        let result = reader.next_sequences(8, 8);
        overrunning.join().unwrap();
        assert!(matches!(
            result,
            Err(Error::CapacityOverrun { written: 9, capacity: 8, .. })
        ));
    }

    #[test]
    fn test_stale_mapping_is_fatal() {
        let channel = Channel::new(&[4]);
        let _producer = channel.producer(16);
        let mut reader = channel.reader();

        assert!(matches!(
            reader.set_configuration(&configuration(8)),
            Err(Error::ReservedRowsMismatch { found: 16, expected: 8, .. })
        ));
        assert_eq!(reader.state(), ReaderState::Terminal);
    }

    #[test]
    fn test_missing_mapping_is_fatal() {
        let channel = Channel::new(&[4]);
        let _signals = ProducerSignals::create(&channel.hub, &channel.options.names()).unwrap();
        let mut reader = channel.reader();
        assert_eq!(reader.state(), ReaderState::Uninitialized);

        let error = reader.set_configuration(&configuration(8)).unwrap_err();
        assert!(matches!(
            error,
            Error::Core(mbx_core::Error::MappingUnavailable { .. })
        ));
        assert_eq!(error.category(), crate::error::ErrorCategory::Setup);
    }

    #[test]
    fn test_missing_signal_fails_construction() {
        let channel = Channel::new(&[4]);
        let result = SharedMemoryReader::with_signal_opener(channel.options.clone(), &channel.hub);
        match result {
            Err(Error::SignalUnavailable { name, .. }) => {
                assert_eq!(name, channel.options.names().request);
            }
            Err(other) => panic!("expected a missing signal, got {other:?}"),
            Ok(_) => panic!("expected a missing signal"),
        }
    }

    #[test]
    fn test_invalid_options_fail_construction() {
        let channel = Channel::new(&[4]);
        let _producer = channel.producer(8);
        let mut options = channel.options.clone();
        options.streams.push(StreamDescriptor::dense("again", "F", 2));

        assert!(matches!(
            SharedMemoryReader::with_signal_opener(options, &channel.hub),
            Err(Error::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_configuration_is_sized_once() {
        let channel = Channel::new(&[4]);
        let _producer = channel.producer(8);
        let mut reader = channel.reader();

        // Unknown minibatch size leaves the buffers closed
        reader.set_configuration(&configuration(0)).unwrap();
        assert_eq!(reader.minibatch_size(), None);
        assert_eq!(reader.state(), ReaderState::Uninitialized);

        reader.set_configuration(&configuration(8)).unwrap();
        reader.set_configuration(&configuration(8)).unwrap();
        reader.set_configuration(&configuration(16)).unwrap();
        assert_eq!(reader.minibatch_size(), Some(8));
        assert_eq!(reader.epoch_configuration().total_epoch_size, EpochSize::Unbounded);
        assert_eq!(reader.epoch_configuration().epoch_index, 0);
    }

    #[test]
    fn test_out_of_order_calls_are_refused() {
        let channel = Channel::new(&[4]);
        let _producer = channel.producer(8);
        let mut reader = channel.reader();

        assert!(matches!(
            reader.start_epoch(&EpochConfiguration::full_sweep(0, 0)),
            Err(Error::InvalidState { .. })
        ));

        reader.set_configuration(&configuration(8)).unwrap();
        assert!(matches!(
            reader.next_sequences(8, 8),
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(reader.state(), ReaderState::AwaitingEpochStart);
    }

    #[test]
    fn test_stream_descriptions_follow_options() {
        let channel = Channel::new(&[4, 1]);
        let _producer = channel.producer(8);
        let reader = channel.reader();

        let streams = reader.stream_descriptions();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams[1].id, 1);
        assert_eq!(streams[1].alias, "L");
        assert_eq!(streams[0].sample_layout.num_elements(), 4);
    }

    #[test]
    fn test_diagnostic_dump_is_flushed_every_round() {
        let channel = Channel::new(&[2, 1]);
        let path = channel.dir.path().join("dump.txt");
        let options = channel.options.clone().with_diagnostic_dump(&path);

        let epoch = vec![
            Minibatch::synthetic(&[2, 1], 2, 0),
            Minibatch::synthetic(&[2, 1], 2, 1),
        ];
        let producer = channel.producer(2).spawn(vec![epoch]);
        let mut reader = SharedMemoryReader::with_signal_opener(options, &channel.hub).unwrap();
        reader.set_configuration(&configuration(2)).unwrap();
        reader.start_epoch(&EpochConfiguration::full_sweep(2, 0)).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        let first = "|F 0.000000 1.000000 |L 100.000000 \n|F 10.000000 11.000000 |L 110.000000 \n";
        assert_eq!(reader.next_sequences(2, 2).unwrap().num_rows(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);

        let second = "|F 1000.000000 1001.000000 |L 1100.000000 \n|F 1010.000000 1011.000000 |L 1110.000000 \n";
        assert_eq!(reader.next_sequences(2, 2).unwrap().num_rows(), 2);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{first}{second}"));

        assert!(reader.next_sequences(2, 2).unwrap().end_of_epoch);
        producer.join().unwrap().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format!("{first}{second}"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_named_semaphore_channel_end_to_end() {
        let channel = Channel::new(&[3]);
        let names = channel.options.names();
        let request = NamedSemaphore::create(&names.request).unwrap();
        let response = NamedSemaphore::create(&names.response).unwrap();
        let reset_announce = NamedSemaphore::create(&names.reset_announce).unwrap();
        let reset_done = NamedSemaphore::create(&names.reset_done).unwrap();
        let mut buffer =
            crate::loopback::ProducerBuffer::create(channel.dir.path(), &names.mapping("F"), 3, 4).unwrap();

        let minibatch = Minibatch::synthetic(&[3], 4, 2);
        let rows = minibatch.streams[0].clone();
        let producer = std::thread::spawn(move || -> crate::error::Result<()> {
            reset_announce.wait_for_signal()?;
            reset_done.set_signal()?;

            request.wait_for_signal()?;
            for (n, row) in rows.iter().enumerate() {
                buffer.write_row(n, row)?;
            }
            buffer.publish(4)?;
            response.set_signal()?;

            request.wait_for_signal()?;
            buffer.publish(0)?;
            response.set_signal()?;
            request.wait_for_signal()
        });

        let mut reader = SharedMemoryReader::new(channel.options.clone()).unwrap();
        reader.set_configuration(&configuration(4)).unwrap();
        reader.start_epoch(&EpochConfiguration::full_sweep(4, 0)).unwrap();

        let batch = reader.next_sequences(4, 4).unwrap();
        assert_eq!(batch.num_rows(), 4);
        assert_eq!(batch.stream(0).unwrap()[3].data(), minibatch.streams[0][3].as_slice());

        assert!(reader.next_sequences(4, 4).unwrap().end_of_epoch);
        assert_eq!(reader.current_sample_position(), 4);
        producer.join().unwrap().unwrap();
    }

    struct MockOpener {
        signals: RefCell<HashMap<String, MockCrossProcessSignal>>,
    }

    impl SignalOpener for MockOpener {
        fn open(&self, name: &str) -> crate::error::Result<Box<dyn CrossProcessSignal>> {
            let signal = self.signals.borrow_mut().remove(name).unwrap();
            Ok(Box::new(signal))
        }
    }

    #[test]
    fn test_handshake_order() {
        use mockall::Sequence;

        let channel = Channel::new(&[4]);
        let _buffer = crate::loopback::ProducerBuffer::create(
            channel.dir.path(),
            &channel.options.names().mapping("F"),
            4,
            8,
        )
        .unwrap();

        let mut seq = Sequence::new();
        let mut announce = MockCrossProcessSignal::new();
        let mut done = MockCrossProcessSignal::new();
        let mut request = MockCrossProcessSignal::new();
        let mut response = MockCrossProcessSignal::new();
        announce.expect_set_signal().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        done.expect_wait_for_signal().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        request.expect_set_signal().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        response.expect_wait_for_signal().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let names = channel.options.names();
        let opener = MockOpener {
            signals: RefCell::new(HashMap::from([
                (names.reset_announce.clone(), announce),
                (names.reset_done.clone(), done),
                (names.request.clone(), request),
                (names.response.clone(), response),
            ])),
        };

        let mut reader = SharedMemoryReader::with_signal_opener(channel.options.clone(), &opener).unwrap();
        reader.set_configuration(&configuration(8)).unwrap();
        reader.start_epoch(&EpochConfiguration::full_sweep(8, 0)).unwrap();

        // A freshly created buffer reports its reserved rows
        assert_eq!(reader.next_sequences(8, 8).unwrap().num_rows(), 8);
    }
}
