/// Offline turn segmentation demo
/// Feeds a recorded WAV file through the turn segmenter and shows where
/// turns open and close, optionally transcribing and saving each one.
use anyhow::{bail, Context as _};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use voiceloop::audio_seg::{
    SegConfig, SegmentEvent, TurnSegmenter, ENERGY_THRESHOLD, FRAME_SAMPLES, SAMPLE_RATE,
};
use voiceloop::transcribe::{Transcriber, WhisperRecognizer};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 16-bit mono 16 kHz WAV file to segment
    input: PathBuf,

    /// Trailing silence in seconds that closes a turn
    #[arg(long, default_value_t = 1.0)]
    silence: f64,

    /// Energy threshold for the speech gate
    #[arg(long, default_value_t = ENERGY_THRESHOLD)]
    threshold: f32,

    /// Whisper model used to transcribe each turn
    #[arg(long)]
    model: Option<PathBuf>,

    /// Save every completed turn as a WAV file
    #[arg(long)]
    save: bool,
}

/// Save PCM audio data to a WAV file
fn save_pcm_to_wav(pcm: &[i16], filename: &str) -> anyhow::Result<()> {
    let file = File::create(filename)?;
    let mut writer = BufWriter::new(file);

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut wav_writer = hound::WavWriter::new(&mut writer, spec)?;
    for sample in pcm {
        wav_writer.write_sample(*sample)?;
    }
    wav_writer.finalize()?;
    Ok(())
}

fn read_input(path: &Path) -> anyhow::Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    if spec.channels != 1 || spec.sample_rate != SAMPLE_RATE || spec.bits_per_sample != 16 {
        bail!(
            "expected 16-bit mono {} Hz audio, got {}-bit {} channel(s) at {} Hz",
            SAMPLE_RATE,
            spec.bits_per_sample,
            spec.channels,
            spec.sample_rate
        );
    }
    Ok(reader.samples::<i16>().collect::<Result<_, _>>()?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if !args.silence.is_finite() || args.silence < 0.0 {
        bail!("--silence must be a non-negative number of seconds");
    }
    let pcm = read_input(&args.input)?;

    let mut transcriber = match &args.model {
        Some(path) => Some(Transcriber::new(Box::new(WhisperRecognizer::load(path)?))),
        None => None,
    };

    let cfg = SegConfig {
        threshold: args.threshold,
        silence_duration: Duration::from_secs_f64(args.silence),
        ..SegConfig::default()
    };

    println!("Segmenting {} ({:.2}s)", args.input.display(), pcm.len() as f32 / SAMPLE_RATE as f32);
    println!(
        "Threshold {}, closing after {:.2}s of silence\n",
        cfg.threshold,
        cfg.silence_duration.as_secs_f32()
    );

    let frame_time = Duration::from_secs_f64(FRAME_SAMPLES as f64 / SAMPLE_RATE as f64);
    let mut segmenter = TurnSegmenter::new(cfg);
    let start = Instant::now();
    let mut turns_completed = 0;
    let mut discarded = 0;

    // Simulated clock so a file segments exactly as a live stream would
    for (i, frame) in pcm.chunks_exact(FRAME_SAMPLES).enumerate() {
        let now = start + frame_time * i as u32;
        let offset = (frame_time * i as u32).as_secs_f32();

        match segmenter.push_frame(frame, now) {
            Some(SegmentEvent::SpeechStarted) => println!("[{:7.2}s] speech started", offset),
            Some(SegmentEvent::TurnDiscarded { frames }) => {
                discarded += 1;
                println!("[{:7.2}s] discarded short turn ({} frames)", offset, frames);
            }
            Some(SegmentEvent::TurnCompleted(turn)) => {
                turns_completed += 1;
                let duration_sec = turn.duration().as_secs_f32();
                println!(
                    "[{:7.2}s] TURN #{} - {:.2}s, {} frames ({} voiced)",
                    offset,
                    turns_completed,
                    duration_sec,
                    turn.frames,
                    turn.span_frames()
                );

                if let Some(transcriber) = transcriber.as_mut() {
                    match transcriber.transcribe(&turn.samples_f32(), turn.sample_rate) {
                        Ok(t) if t.is_empty() => println!("           text: <empty>"),
                        Ok(t) => println!("           text: \"{}\"", t.text),
                        Err(e) => eprintln!("           transcription failed: {}", e),
                    }
                }

                if args.save {
                    let filename = format!("turn_{:03}_{:.1}s.wav", turns_completed, duration_sec);
                    match save_pcm_to_wav(&turn.pcm, &filename) {
                        Ok(()) => println!("           saved {}", filename),
                        Err(e) => eprintln!("           save failed: {}", e),
                    }
                }
            }
            None => {}
        }
    }

    if segmenter.is_capturing() {
        println!(
            "\nInput ended mid-turn with {:.2}s buffered",
            segmenter.buffer_duration()
        );
    }
    println!(
        "\n{} turn(s) completed, {} discarded",
        turns_completed, discarded
    );
    Ok(())
}
