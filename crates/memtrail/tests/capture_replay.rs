//! A captured session written to a stream replays to the same group state
//! at every position.

use std::io::Cursor;

use memtrail::{
    ChunkPool, OrderedPool, PoolConfig, Profiler, ProfilerConfig, RecorderConfig, StackAllocator,
    StackConfig, StreamingRecorder, Track, TrackError, TrackState, UnorderedPool,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn workload(profiler: &Profiler, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let particles = profiler.group("World/Particles");
    let scratch = profiler.group("Frame/Scratch");

    let mut pool = OrderedPool::with_group(&PoolConfig::new(24, 8, 8), particles.clone()).unwrap();
    let mut stack = StackAllocator::with_group(&StackConfig::new(4096), scratch.clone()).unwrap();
    let mut live = Vec::new();

    for frame in 0..20_u64 {
        let checkpoint = stack.head();
        for _ in 0..rng.gen_range(1..6) {
            stack.acquire(rng.gen_range(1..128), 8).unwrap();
        }
        for _ in 0..rng.gen_range(0..10) {
            if !live.is_empty() && rng.gen_bool(0.4) {
                let index = rng.gen_range(0..live.len());
                pool.release(live.swap_remove(index));
            } else {
                live.push(pool.acquire().unwrap());
            }
        }
        if frame % 5 == 0 {
            pool.shrink();
            particles.mark(frame);
        }
        stack.release(checkpoint);
    }
    // Pool and stack stay alive until here; dropping returns everything.
    assert_eq!(stack.used(), 0);
}

#[test]
fn test_capture_matches_live_profiler() {
    let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
    let mut track = Track::new();
    track.begin_capture(&profiler).unwrap();

    let voices = profiler.group("Audio/Voices");
    let mut pool = UnorderedPool::with_group(&PoolConfig::new(64, 16, 4), voices.clone()).unwrap();
    let held: Vec<_> = (0..6).map(|_| pool.acquire().unwrap()).collect();
    voices.mark(1);
    track.pump().unwrap();
    workload(&profiler, 7);
    track.end_capture().unwrap();
    assert_eq!(track.status(), TrackState::Idle);
    assert_eq!(track.position(), 0);
    track.seek(track.len());

    let end = track.state_at(track.len());
    for group in track.groups() {
        let live = profiler.group(group.path()).stats();
        assert_eq!(group.stats(), live, "{}", group.path());
        assert_eq!(end[group.path()], live);
    }
    assert_eq!(end["Audio"].inclusive.used, 6 * 64);
    assert_eq!(track.markers().len(), 5);

    drop(held);
    drop(pool);
}

#[test]
fn test_stream_replays_every_position() {
    let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
    let mut track = Track::new();
    track.begin_capture(&profiler).unwrap();
    workload(&profiler, 42);
    track.end_capture().unwrap();

    let bytes = track.write_to(Vec::new()).unwrap();
    let mut replayed = Track::deserialize(Cursor::new(bytes)).unwrap();
    assert_eq!(replayed.len(), track.len());
    assert_eq!(replayed.group_count(), track.group_count());

    for position in 0..=track.len() {
        assert_eq!(replayed.state_at(position), track.state_at(position), "position {position}");
    }

    replayed.seek(0);
    let mut steps = 0;
    while replayed.move_to_next_event() {
        steps += 1;
        assert_eq!(replayed.state(), track.state_at(steps));
    }
    assert_eq!(steps, track.len());

    let totals = replayed.state();
    assert_eq!(totals["World"].inclusive.used, 0);
    assert_eq!(totals["Frame/Scratch"].own.reserved, 0);
}

#[test]
fn test_recorder_and_capture_agree() {
    let profiler = Profiler::new(ProfilerConfig::default()).unwrap();
    profiler.group("World/Particles").allocate(256).unwrap();

    let mut track = Track::new();
    track.begin_capture(&profiler).unwrap();
    let config = RecorderConfig {
        flush_interval_ms: 2,
        batch_size: 64,
    };
    let recorder = StreamingRecorder::spawn(&profiler, Vec::new(), config).unwrap();

    workload(&profiler, 3);
    let (bytes, stats) = recorder.stop().unwrap();
    track.end_capture().unwrap();
    assert_eq!(stats.missed, 0);
    assert_eq!(stats.bytes, bytes.len() as u64);

    let recorded = Track::deserialize(Cursor::new(bytes)).unwrap();
    assert_eq!(recorded.len(), track.len());
    assert_eq!(recorded.state_at(recorded.len()), track.state_at(track.len()));
    assert_eq!(recorded.state_at(recorded.len())["World/Particles"].own.reserved, 256);
}

#[test]
fn test_lagging_capture_keeps_consistent_prefix() {
    let config = ProfilerConfig {
        max_retained_events: 16,
        ..ProfilerConfig::default()
    };
    let profiler = Profiler::new(config).unwrap();
    let particles = profiler.group("World/Particles");
    let mut pool = UnorderedPool::with_group(&PoolConfig::new(32, 8, 4), particles.clone()).unwrap();

    let mut track = Track::new();
    track.begin_capture(&profiler).unwrap();
    let held: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
    // One page allocation and four acquires.
    assert_eq!(track.pump().unwrap(), 5);

    for _ in 0..40 {
        let chunk = pool.acquire().unwrap();
        pool.release(chunk);
    }
    let error = track.pump().unwrap_err();
    assert!(matches!(error, TrackError::EventsMissed { count } if count > 0));
    assert_eq!(track.status(), TrackState::Idle);

    let end = track.state_at(track.len());
    assert_eq!(end["World/Particles"].own.used, 4 * 32);
    assert_ne!(end["World/Particles"].own, particles.stats().own);

    let bytes = track.write_to(Vec::new()).unwrap();
    let replayed = Track::deserialize(Cursor::new(bytes)).unwrap();
    assert_eq!(replayed.state_at(replayed.len()), end);

    drop(held);
}
