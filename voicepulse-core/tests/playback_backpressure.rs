use std::thread;

use voicepulse_core::playback::channel;
use voicepulse_core::{PlaybackConfig, PlaybackEvent};

const CHUNK: usize = 1_024;
const CHUNKS: usize = 200;

#[test]
fn burst_below_high_water_is_retained_without_events() {
    let (producer, mut worklet) = channel(PlaybackConfig::default());
    let events = producer.events();

    for i in 0..CHUNKS {
        producer.push_samples(vec![(i + 1) as f32 / 1_000.0; CHUNK]).unwrap();
    }

    let mut out = vec![0.0f32; CHUNK];
    worklet.render(&mut out);

    let stats = producer.diagnostics_snapshot();
    assert_eq!(stats.chunks_sent, CHUNKS as u64);
    assert_eq!(stats.chunks_received, CHUNKS as u64);
    assert_eq!(worklet.queued_samples(), CHUNKS * CHUNK - CHUNK);
    assert!(out.iter().all(|&s| s == 0.001));
    assert!(events.try_recv().is_err());
}

#[test]
fn backpressure_is_signalled_but_audio_is_never_dropped() {
    let config = PlaybackConfig {
        sample_rate: 1_000,
        high_water_seconds: 2.0,
        low_water_seconds: 1.0,
    };
    let (producer, mut worklet) = channel(config);
    let events = producer.events();

    // Feed from another thread, the way a network task would.
    let feeder = {
        let producer = producer.clone();
        thread::spawn(move || {
            for _ in 0..10 {
                producer.push_samples(vec![0.25; 500]).unwrap();
            }
        })
    };
    feeder.join().unwrap();

    let mut out = vec![0.0f32; 500];
    worklet.render(&mut out);
    assert!(matches!(
        events.try_recv(),
        Ok(PlaybackEvent::Backpressure { queued_samples: 5_000 })
    ));
    assert_eq!(worklet.queued_samples(), 4_500);

    let mut rendered = 500;
    while worklet.queued_samples() > 0 {
        worklet.render(&mut out);
        rendered += out.iter().filter(|&&s| s == 0.25).count();
    }
    assert_eq!(rendered, 5_000);

    let mut saw_resumed = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PlaybackEvent::Resumed { .. }) {
            saw_resumed = true;
        }
    }
    assert!(saw_resumed);
}
