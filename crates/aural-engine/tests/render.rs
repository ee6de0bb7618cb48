//! End-to-end rendering scenarios through the public handle API
//!
//! Everything drives a loopback render: no backend, `render_f32` pulled
//! directly. 44100 Hz stereo f32 output, 1024-frame updates.

use aural_core::{BufferLayout, SampleType, StorageFormat};
use aural_dsp::effects::ReverbParams;
use aural_engine::{
    AuralError, Device, DeviceConfig, EffectParams, EngineEvent, HrtfMode, OffsetKind,
    SourceState, SourceType,
};
use aural_spatial::Vec3;

fn test_config() -> DeviceConfig {
    let mut config = DeviceConfig::default();
    config.hrtf = HrtfMode::Off;
    config
}

fn sine_i16(frequency: f32, rate: u32, frames: usize) -> Vec<u8> {
    (0..frames)
        .map(|i| {
            let s = (std::f32::consts::TAU * frequency * i as f32 / rate as f32).sin();
            (s * 0.8 * 32767.0) as i16
        })
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

fn mono_format() -> StorageFormat {
    StorageFormat::new(BufferLayout::Mono, SampleType::I16)
}

fn channel_rms(interleaved: &[f32], channel: usize, channels: usize) -> f64 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    let mut index = channel;
    while index < interleaved.len() {
        sum += (interleaved[index] as f64).powi(2);
        count += 1;
        index += channels;
    }
    (sum / count.max(1) as f64).sqrt()
}

#[test]
fn test_front_source_renders_symmetric() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(1000.0, 44100, 44100), 44100)
        .unwrap();

    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context
        .source_set_position(source, Vec3::new(0.0, 0.0, -1.0))
        .unwrap();
    context.source_play(&[source]).unwrap();

    let mut out = vec![0.0f32; 1024 * 2];
    device.render_f32(&mut out);

    let left = channel_rms(&out, 0, 2);
    let right = channel_rms(&out, 1, 2);
    assert!(left > 0.01, "left channel silent: {left}");
    assert!(right > 0.01, "right channel silent: {right}");
    // On-axis source must be symmetric sample for sample.
    for frame in out.chunks_exact(2) {
        assert!((frame[0] - frame[1]).abs() <= 1e-6);
    }
    assert_eq!(context.source_state(source).unwrap(), SourceState::Playing);
}

#[test]
fn test_lateral_source_favors_near_ear() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(1000.0, 44100, 44100), 44100)
        .unwrap();

    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context
        .source_set_position(source, Vec3::new(1.0, 0.0, 0.0))
        .unwrap();
    context.source_play(&[source]).unwrap();

    let mut out = vec![0.0f32; 4096 * 2];
    device.render_f32(&mut out);

    let left = channel_rms(&out, 0, 2);
    let right = channel_rms(&out, 1, 2);
    assert!(
        right > left * 1.2,
        "expected right emphasis: left {left}, right {right}"
    );
}

#[test]
fn test_queue_drains_to_stopped_and_unqueues_in_order() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffers = device.gen_buffers(3);
    for &id in &buffers {
        device
            .buffer_data(id, mono_format(), &sine_i16(440.0, 44100, 4410), 44100)
            .unwrap();
    }

    let source = context.gen_sources(1).unwrap()[0];
    context.queue_buffers(source, &buffers).unwrap();
    assert_eq!(context.source_type(source).unwrap(), SourceType::Streaming);
    for &id in &buffers {
        assert_eq!(device.buffer_ref_count(id).unwrap(), 1);
    }

    context.source_play(&[source]).unwrap();
    let mut out = vec![0.0f32; (13230 + 512) * 2];
    device.render_f32(&mut out);

    assert_eq!(context.source_state(source).unwrap(), SourceState::Stopped);
    assert_eq!(context.source_processed_count(source).unwrap(), 3);

    let freed = context.unqueue_buffers(source, 3).unwrap();
    assert_eq!(freed, buffers);
    for &id in &buffers {
        assert_eq!(device.buffer_ref_count(id).unwrap(), 0);
    }

    // A stopped-state event arrived.
    let mut saw_stop = false;
    while let Some(event) = context.poll_event() {
        if event
            == (EngineEvent::SourceStateChanged {
                source,
                state: SourceState::Stopped,
            })
        {
            saw_stop = true;
        }
    }
    assert!(saw_stop, "missing source-stopped event");
}

#[test]
fn test_looping_source_keeps_playing_and_wraps_offset() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(440.0, 44100, 4410), 44100)
        .unwrap();

    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context.source_set_looping(source, true).unwrap();
    context.source_play(&[source]).unwrap();

    let mut out = vec![0.0f32; 44100 * 2];
    device.render_f32(&mut out);

    assert_eq!(context.source_state(source).unwrap(), SourceState::Playing);
    let offset = context.source_sample_offset(source).unwrap();
    // Exactly at a loop boundary; either representation is fine.
    assert!(
        offset == 0 || offset == 4410,
        "offset {offset} not at the loop boundary"
    );
    assert_eq!(context.source_processed_count(source).unwrap(), 0);
    assert_eq!(device.buffer_ref_count(buffer).unwrap(), 1);

    // Still audible well past the buffer length.
    let tail = &out[(44100 - 1024) * 2..];
    assert!(channel_rms(tail, 0, 2) > 0.01);
}

#[test]
fn test_effect_slot_cycle_rejected() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let slots = context.gen_effect_slots(2).unwrap();
    let (s1, s2) = (slots[0], slots[1]);
    context.slot_set_target(s1, s2).unwrap();

    let err = context.slot_set_target(s2, s1).unwrap_err();
    assert!(matches!(err, AuralError::InvalidOperation(_)));
    // Chain unchanged.
    assert_eq!(context.slot_target(s1).unwrap(), s2);
    assert_eq!(context.slot_target(s2).unwrap(), 0);

    let err = context.slot_set_target(s1, s1).unwrap_err();
    assert!(matches!(err, AuralError::InvalidOperation(_)));
}

#[test]
fn test_referenced_slot_cannot_be_deleted() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let slot = context.gen_effect_slots(1).unwrap()[0];
    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_send(source, 0, slot, 0).unwrap();

    let err = context.delete_effect_slots(&[slot]).unwrap_err();
    assert!(matches!(err, AuralError::InvalidOperation(_)));

    context.source_set_send(source, 0, 0, 0).unwrap();
    context.delete_effect_slots(&[slot]).unwrap();
}

#[test]
fn test_reverb_send_adds_wet_tail() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let effect = context.gen_effects(1)[0];
    context
        .effect_set(effect, EffectParams::Reverb(ReverbParams::default()))
        .unwrap();
    let slot = context.gen_effect_slots(1).unwrap()[0];
    context.slot_set_effect(slot, effect).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(500.0, 44100, 4410), 44100)
        .unwrap();

    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context.source_set_send(source, 0, slot, 0).unwrap();
    context.source_play(&[source]).unwrap();

    // Render well past the dry content; the reverb tail keeps ringing.
    let mut out = vec![0.0f32; 22050 * 2];
    device.render_f32(&mut out);

    let tail = &out[(4410 + 2048) * 2..(4410 + 8192) * 2];
    let tail_rms = channel_rms(tail, 0, 2);
    assert!(tail_rms > 1e-5, "no reverb tail: {tail_rms}");
}

#[test]
fn test_disconnect_stops_sources_and_posts_events() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(440.0, 44100, 44100), 44100)
        .unwrap();
    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context.source_play(&[source]).unwrap();

    let mut out = vec![0.0f32; 2048 * 2];
    device.render_f32(&mut out);
    assert_eq!(context.source_state(source).unwrap(), SourceState::Playing);

    device.handle_disconnect("test harness");

    assert_eq!(context.source_state(source).unwrap(), SourceState::Stopped);
    // Offset froze at the last rendered position.
    assert!(context.source_sample_offset(source).unwrap() > 0);

    let mut saw_stop = false;
    let mut saw_disconnect = false;
    while let Some(event) = context.poll_event() {
        match event {
            EngineEvent::SourceStateChanged {
                state: SourceState::Stopped,
                ..
            } => saw_stop = true,
            EngineEvent::Disconnected => saw_disconnect = true,
            _ => {}
        }
    }
    assert!(saw_stop && saw_disconnect);

    // Play on a disconnected device lands in stopped immediately.
    context.source_play(&[source]).unwrap();
    assert_eq!(context.source_state(source).unwrap(), SourceState::Stopped);
}

#[test]
fn test_property_validation_boundaries() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();
    let source = context.gen_sources(1).unwrap()[0];

    assert!(matches!(
        context.source_set_gain(source, -0.1),
        Err(AuralError::InvalidValue(_))
    ));
    assert_eq!(context.source_props(source).unwrap().gain, 1.0);

    // Pitch zero is legal and silently crawls.
    context.source_set_pitch(source, 0.0).unwrap();
    assert_eq!(context.source_props(source).unwrap().pitch, 0.0);

    assert!(matches!(
        context.source_set_position(source, Vec3::new(f32::NAN, 0.0, 0.0)),
        Err(AuralError::InvalidValue(_))
    ));
    assert!(matches!(
        context.source_set_gain(99999, 1.0),
        Err(AuralError::InvalidName(99999))
    ));
}

#[test]
fn test_pitch_zero_keeps_playing() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(440.0, 44100, 4410), 44100)
        .unwrap();
    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context.source_set_pitch(source, 0.0).unwrap();
    context.source_play(&[source]).unwrap();

    // Far more frames than the buffer holds at unity pitch.
    let mut out = vec![0.0f32; 8192 * 2];
    device.render_f32(&mut out);
    assert_eq!(context.source_state(source).unwrap(), SourceState::Playing);
    // The cursor has barely moved.
    assert!(context.source_sample_offset(source).unwrap() < 100);
}

#[test]
fn test_queue_format_mismatch_rejected() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let good = device.gen_buffers(1)[0];
    device
        .buffer_data(good, mono_format(), &sine_i16(440.0, 44100, 100), 44100)
        .unwrap();
    let wrong_rate = device.gen_buffers(1)[0];
    device
        .buffer_data(wrong_rate, mono_format(), &sine_i16(440.0, 22050, 100), 22050)
        .unwrap();
    let wrong_layout = device.gen_buffers(1)[0];
    let stereo = StorageFormat::new(BufferLayout::Stereo, SampleType::I16);
    device
        .buffer_data(wrong_layout, stereo, &sine_i16(440.0, 44100, 200), 44100)
        .unwrap();

    let source = context.gen_sources(1).unwrap()[0];
    context.queue_buffers(source, &[good]).unwrap();

    assert!(matches!(
        context.queue_buffers(source, &[wrong_rate]),
        Err(AuralError::InvalidOperation(_))
    ));
    assert!(matches!(
        context.queue_buffers(source, &[wrong_layout]),
        Err(AuralError::InvalidOperation(_))
    ));
    // Failed queues left the ref counts alone.
    assert_eq!(device.buffer_ref_count(wrong_rate).unwrap(), 0);
    assert_eq!(device.buffer_ref_count(wrong_layout).unwrap(), 0);
    assert_eq!(context.source_queued_count(source).unwrap(), 1);
}

#[test]
fn test_unqueue_more_than_processed_rejected() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(440.0, 44100, 44100), 44100)
        .unwrap();
    let source = context.gen_sources(1).unwrap()[0];
    context.queue_buffers(source, &[buffer]).unwrap();

    let err = context.unqueue_buffers(source, 1).unwrap_err();
    assert!(matches!(err, AuralError::InvalidValue(_)));
    assert_eq!(device.buffer_ref_count(buffer).unwrap(), 1);
}

#[test]
fn test_static_source_queue_is_immutable() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let a = device.gen_buffers(1)[0];
    device
        .buffer_data(a, mono_format(), &sine_i16(440.0, 44100, 100), 44100)
        .unwrap();
    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, a).unwrap();
    assert_eq!(context.source_type(source).unwrap(), SourceType::Static);

    assert!(matches!(
        context.queue_buffers(source, &[a]),
        Err(AuralError::InvalidOperation(_))
    ));
    assert!(matches!(
        context.unqueue_buffers(source, 1),
        Err(AuralError::InvalidOperation(_))
    ));
}

#[test]
fn test_offset_seek_before_play() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(440.0, 44100, 44100), 44100)
        .unwrap();
    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context
        .source_set_offset(source, OffsetKind::Samples, 22050.0)
        .unwrap();
    context.source_play(&[source]).unwrap();

    let mut out = vec![0.0f32; 1024 * 2];
    device.render_f32(&mut out);

    let offset = context.source_sample_offset(source).unwrap();
    assert!(
        (22050..=22050 + 2048).contains(&(offset as usize)),
        "offset {offset} not near the seek point"
    );
}

#[test]
fn test_rewind_returns_to_initial() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(440.0, 44100, 44100), 44100)
        .unwrap();
    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context.source_play(&[source]).unwrap();

    let mut out = vec![0.0f32; 2048 * 2];
    device.render_f32(&mut out);

    context.source_rewind(&[source]).unwrap();
    assert_eq!(context.source_state(source).unwrap(), SourceState::Initial);
    device.render_f32(&mut out);
    assert_eq!(context.source_sample_offset(source).unwrap(), 0);
}

#[test]
fn test_pause_resume_preserves_cursor() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(440.0, 44100, 44100), 44100)
        .unwrap();
    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context.source_play(&[source]).unwrap();

    let mut out = vec![0.0f32; 2048 * 2];
    device.render_f32(&mut out);

    context.source_pause(&[source]).unwrap();
    assert_eq!(context.source_state(source).unwrap(), SourceState::Paused);
    let paused_at = context.source_sample_offset(source).unwrap();
    assert!(paused_at > 0);

    // Rendering while paused leaves the cursor alone.
    device.render_f32(&mut out);
    assert_eq!(context.source_sample_offset(source).unwrap(), paused_at);

    context.source_play(&[source]).unwrap();
    device.render_f32(&mut out);
    assert!(context.source_sample_offset(source).unwrap() > paused_at);
}

#[test]
fn test_offset_monotone_while_playing() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(440.0, 44100, 44100), 44100)
        .unwrap();
    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context.source_play(&[source]).unwrap();

    let mut out = vec![0.0f32; 1024 * 2];
    let mut last = 0u64;
    for _ in 0..16 {
        device.render_f32(&mut out);
        let offset = context.source_sample_offset(source).unwrap();
        assert!(offset >= last, "offset went backwards: {last} -> {offset}");
        last = offset;
    }
}

#[test]
fn test_deferred_updates_batch() {
    let device = Device::open(test_config());
    let context = device.create_context(&[]).unwrap();

    let buffer = device.gen_buffers(1)[0];
    device
        .buffer_data(buffer, mono_format(), &sine_i16(440.0, 44100, 44100), 44100)
        .unwrap();
    let source = context.gen_sources(1).unwrap()[0];
    context.source_set_buffer(source, buffer).unwrap();
    context.source_play(&[source]).unwrap();

    let mut out = vec![0.0f32; 1024 * 2];
    device.render_f32(&mut out);

    context.defer_updates(true);
    context.source_set_gain(source, 0.0).unwrap();
    device.render_f32(&mut out);
    // Still audible: the gain change is pending.
    assert!(channel_rms(&out, 0, 2) > 0.001);

    context.defer_updates(false);
    // One period to consume, one to fade fully.
    device.render_f32(&mut out);
    device.render_f32(&mut out);
    device.render_f32(&mut out);
    assert!(
        channel_rms(&out, 0, 2) < 1e-4,
        "deferred gain change never landed"
    );
}
