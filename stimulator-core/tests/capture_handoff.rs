use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use stimulator_core::capture::{
    AnalogChannel, CaptureShared, CapturePhase, Converter, NOT_READ, SampleCapture, Sampler,
    on_conversion_complete,
};

/// Foreground half: posts the requested channel to the interrupt thread.
struct ThreadConverter {
    requests: Sender<AnalogChannel>,
}

impl Converter for ThreadConverter {
    fn begin_conversion(&mut self, channel: AnalogChannel) {
        self.requests.send(channel).unwrap();
    }
}

/// Interrupt half: re-arms itself for the next channel of the pass.
#[derive(Default)]
struct ChainedConversions(VecDeque<AnalogChannel>);

impl Converter for ChainedConversions {
    fn begin_conversion(&mut self, channel: AnalogChannel) {
        self.0.push_back(channel);
    }
}

fn reading(pass: usize, channel: AnalogChannel) -> u8 {
    ((pass * 3 + channel.as_index()) % 0xFF) as u8
}

/// Runs the conversion-complete handler on its own thread, like an ISR would.
fn spawn_interrupt(
    shared: Arc<CaptureShared>,
    requests: Receiver<AnalogChannel>,
    latency: Duration,
) -> thread::JoinHandle<usize> {
    thread::spawn(move || {
        let mut passes = 0;
        let mut chain = ChainedConversions::default();
        for first in requests {
            chain.0.push_back(first);
            while let Some(channel) = chain.0.pop_front() {
                thread::sleep(latency);
                on_conversion_complete(&shared, &mut chain, channel, reading(passes, channel));
            }
            passes += 1;
        }
        passes
    })
}

#[test]
fn foreground_sees_every_reading_after_the_flag_clears() {
    let shared = Arc::new(CaptureShared::new());
    let (sender, receiver) = mpsc::channel();
    let interrupt = spawn_interrupt(Arc::clone(&shared), receiver, Duration::ZERO);

    let mut capture = SampleCapture::new(&shared, ThreadConverter { requests: sender });
    let mut pass = 0;
    for _ in 0..250 {
        for phase in CapturePhase::ALL {
            capture.start();
            capture.await_and_store(phase);
            assert!(!shared.is_pending());
            assert_eq!(
                capture.samples().row(phase),
                [
                    reading(pass, AnalogChannel::Current),
                    reading(pass, AnalogChannel::Correction),
                    reading(pass, AnalogChannel::Tissue),
                ]
            );
            pass += 1;
        }
    }

    drop(capture);
    assert_eq!(interrupt.join().unwrap(), 1_000);
}

#[test]
fn await_blocks_until_the_last_channel_completes() {
    let shared = Arc::new(CaptureShared::new());
    let (sender, receiver) = mpsc::channel();
    let interrupt = spawn_interrupt(Arc::clone(&shared), receiver, Duration::from_millis(5));

    let mut capture = SampleCapture::new(&shared, ThreadConverter { requests: sender });
    capture.start();
    assert!(shared.is_pending());
    capture.await_and_store(CapturePhase::PositivePulse);
    assert!(!shared.is_pending());
    assert_eq!(capture.samples().row(CapturePhase::PositivePulse), [0, 1, 2]);
    assert_eq!(
        capture.samples().row(CapturePhase::AfterPositive),
        [NOT_READ; 3]
    );

    drop(capture);
    assert_eq!(interrupt.join().unwrap(), 1);
}
