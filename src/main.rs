// src/main.rs

use anyhow::Result;
use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use strata::engine::{EngineCommand, EngineConfig, LoopSynchronizer};
use strata::fx_components::EffectKind;
use strata::monitor::MonitorBuffer;
use strata::{audio_io, settings};

fn main() -> Result<()> {
    env_logger::init();

    let app_settings = settings::load_settings();

    let host_id = match &app_settings.host_name {
        Some(name) => cpal::available_hosts()
            .into_iter()
            .find(|id| id.name().eq_ignore_ascii_case(name))
            .unwrap_or_else(|| {
                log::warn!("Audio host '{}' not found, using default", name);
                cpal::default_host().id()
            }),
        None => cpal::default_host().id(),
    };

    let sample_rate = app_settings.sample_rate.unwrap_or(48000);
    let (engine, mut handle) = LoopSynchronizer::new(EngineConfig {
        sample_rate: sample_rate as f32,
        num_tracks: app_settings.num_tracks,
        max_loop_seconds: app_settings.max_loop_seconds,
        trigger_low_threshold: app_settings.trigger_low_threshold,
        trigger_high_threshold: app_settings.trigger_high_threshold,
    });
    if app_settings.input_monitoring {
        handle.send(EngineCommand::SetInputMonitoring(true));
    }

    let latency_ms = Arc::new(AtomicU32::new(
        (app_settings.input_latency_compensation_ms * 100.0) as u32,
    ));
    let xrun_count = Arc::new(AtomicUsize::new(0));

    let (_input_stream, _output_stream, active_sr, active_bs) = audio_io::init_and_run_streams(
        host_id,
        app_settings.input_device.clone(),
        app_settings.output_device.clone(),
        Some(sample_rate),
        app_settings.buffer_size,
        latency_ms,
        engine,
        xrun_count.clone(),
    )?;
    log::info!("Engine running at {} Hz, {} sample blocks", active_sr, active_bs);

    settings::save_settings(&app_settings);

    let mut monitor = MonitorBuffer::new();
    let stdin = std::io::stdin();
    print_help();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = parts.first() else {
            continue;
        };
        let num_tracks = handle.tracks.len();

        match command {
            "add" => {
                let id = handle.add_track();
                println!("added track {}", id);
            }
            "rec" => {
                if let Some(id) = parse_track(&parts, 1, num_tracks) {
                    handle.send(EngineCommand::StartRecording(id));
                }
            }
            "recl" => {
                if let Some(id) = parse_track(&parts, 1, num_tracks) {
                    handle.send(EngineCommand::StartRecordingWithLookback(id));
                }
            }
            "stop" => {
                if let Some(id) = parse_track(&parts, 1, num_tracks) {
                    handle.send(EngineCommand::StopRecording(id));
                }
            }
            "play" => {
                if let Some(id) = parse_track(&parts, 1, num_tracks) {
                    handle.send(EngineCommand::StartPlaying(id));
                }
            }
            "playall" => handle.send(EngineCommand::StartAllPlayback),
            "pause" => {
                if let Some(id) = parse_track(&parts, 1, num_tracks) {
                    handle.send(EngineCommand::StopPlaying(id));
                }
            }
            "undo" => handle.send(EngineCommand::Undo),
            "clear" => {
                if let Some(id) = parse_track(&parts, 1, num_tracks) {
                    handle.send(EngineCommand::ClearTrack(id));
                }
            }
            "clearall" => handle.send(EngineCommand::AllClear),
            "gain" => {
                if let (Some(id), Some(gain)) =
                    (parse_track(&parts, 1, num_tracks), parse_f32(&parts, 2))
                {
                    handle.send(EngineCommand::SetTrackGain(id, gain));
                }
            }
            "mute" => {
                if let Some(id) = parse_track(&parts, 1, num_tracks) {
                    handle.send(EngineCommand::ToggleTrackMute(id));
                }
            }
            "mon" => {
                let enabled = parts.get(1).map_or(true, |&v| v == "on");
                handle.send(EngineCommand::SetInputMonitoring(enabled));
            }
            "fx" => {
                if let (Some(id), Some(kind)) = (
                    parse_track(&parts, 1, num_tracks),
                    parts.get(2).and_then(|s| s.parse::<EffectKind>().ok()),
                ) {
                    handle.send(EngineCommand::LoadEffect { track: id, kind });
                } else {
                    println!("usage: fx <track> <filter|compressor|delay|reverb|beatrepeat>");
                }
            }
            "fxclear" => {
                if let Some(id) = parse_track(&parts, 1, num_tracks) {
                    handle.send(EngineCommand::ClearEffects(id));
                }
            }
            "fxset" => {
                if let (Some(id), Some(effect), Some(name), Some(value)) = (
                    parse_track(&parts, 1, num_tracks),
                    parts.get(2).and_then(|s| s.parse::<usize>().ok()),
                    parts.get(3),
                    parse_f32(&parts, 4),
                ) {
                    handle.send(EngineCommand::SetEffectParameter {
                        track: id,
                        effect,
                        name: name.to_string(),
                        value,
                    });
                } else {
                    println!("usage: fxset <track> <effect-index> <param> <value>");
                }
            }
            "autotune" => {
                if let Some(id) = parse_track(&parts, 1, num_tracks) {
                    let enabled = parts.get(2).map_or(true, |&v| v == "on");
                    handle.send(EngineCommand::SetAutotune { track: id, enabled });
                }
            }
            "amount" => {
                if let (Some(id), Some(amount)) =
                    (parse_track(&parts, 1, num_tracks), parse_f32(&parts, 2))
                {
                    handle.send(EngineCommand::SetAutotuneAmount { track: id, amount });
                }
            }
            "trig" => {
                if let (Some(low), Some(high)) = (parse_f32(&parts, 1), parse_f32(&parts, 2)) {
                    handle.send(EngineCommand::SetTriggerThresholds { low, high });
                }
            }
            "status" => {
                monitor.update(&mut handle);
                print_status(&handle, &monitor, &xrun_count);
            }
            "help" => print_help(),
            "quit" | "exit" => break,
            other => println!("unknown command: {} (try 'help')", other),
        }
    }

    Ok(())
}

fn parse_track(parts: &[&str], index: usize, num_tracks: usize) -> Option<usize> {
    let id = parts.get(index)?.parse::<usize>().ok()?;
    if id < num_tracks {
        Some(id)
    } else {
        println!("track {} out of range (0..{})", id, num_tracks);
        None
    }
}

fn parse_f32(parts: &[&str], index: usize) -> Option<f32> {
    parts.get(index)?.parse::<f32>().ok()
}

fn print_status(handle: &strata::EngineHandle, monitor: &MonitorBuffer, xrun_count: &AtomicUsize) {
    let master_len = handle.engine.master_loop_length();
    println!(
        "master: {} samples | position {:.2} | cpu {:.1}% | out peak {:.3} | xruns {}",
        master_len,
        handle.engine.master_position(),
        handle.engine.cpu_load() as f32 / 10.0,
        monitor.peak(),
        xrun_count.load(Ordering::Relaxed),
    );
    for id in 0..handle.tracks.len() {
        println!(
            "  track {}: {:?} | len {} | x{:.2} | pos {:.2} | rms {:.3}",
            id,
            handle.track_state(id),
            handle.track_recorded_len(id),
            handle.tracks[id].loop_multiplier(),
            handle.track_position(id),
            handle.track_rms(id),
        );
    }
}

fn print_help() {
    println!("commands:");
    println!("  add           append a new track");
    println!("  rec <t>       start recording track t");
    println!("  recl <t>      start recording with trigger lookback");
    println!("  stop <t>      stop recording track t");
    println!("  play <t> / playall / pause <t>");
    println!("  undo | clear <t> | clearall");
    println!("  gain <t> <v> | mute <t> | mon [on|off]");
    println!("  fx <t> <kind> | fxclear <t> | fxset <t> <i> <param> <v>");
    println!("  autotune <t> [on|off] | amount <t> <v>");
    println!("  trig <low> <high>");
    println!("  status | help | quit");
}
