//! Feed a WAV file through the aggregator as a stream of job chunks.
//!
//! Operational smoke tool: slices a mono PCM16 WAV into chunk-sized job
//! records, processes them one by one, and prints what the aggregator
//! emitted per call.

use std::env;
use std::process;
use uttermill::audio::{decode, pcm};
use uttermill::{Aggregator, Config, JobRequest, NullReporter, ResultReason};

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <wav-file> [chunk-ms] [--json]", args[0]);
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  {} speech.wav", args[0]);
        eprintln!("  {} speech.wav 250 --json", args[0]);
        process::exit(1);
    }

    let wav_file = &args[1];
    let chunk_ms: u64 = args
        .get(2)
        .filter(|a| !a.starts_with("--"))
        .and_then(|a| a.parse().ok())
        .filter(|&ms| ms > 0)
        .unwrap_or(500);
    let json_output = args.iter().any(|a| a == "--json");

    let (samples, sample_rate) = match load_wav(wav_file) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to load WAV file: {}", e);
            process::exit(1);
        }
    };

    let bytes = pcm::from_samples(&samples);
    let duration_ms = pcm::duration_ms(bytes.len(), sample_rate);
    if !json_output {
        println!("Audio file:  {}", wav_file);
        println!("Sample rate: {} Hz", sample_rate);
        println!(
            "Duration:    {}ms ({:.2}s), {} chunks of {}ms",
            duration_ms,
            duration_ms as f64 / 1000.0,
            duration_ms.div_ceil(chunk_ms),
            chunk_ms
        );
        println!();
    }

    let aggregator = match Aggregator::new(Config::default().with_env_overrides()) {
        Ok(agg) => agg.with_reporter(std::sync::Arc::new(NullReporter)),
        Err(e) => {
            eprintln!("Failed to build aggregator: {}", e);
            process::exit(1);
        }
    };

    let chunk_bytes = pcm::bytes_for_ms(chunk_ms, sample_rate).max(2);
    let chunks: Vec<&[u8]> = bytes.chunks(chunk_bytes).collect();
    let mut emitted_batches = 0usize;
    let mut emitted_bytes = 0usize;

    for (i, chunk) in chunks.iter().enumerate() {
        let mut request = JobRequest::new(&format!("job-{:04}", i), "wav-feed", 1);
        request.sample_rate = sample_rate;
        request.audio = decode::encode_base64(chunk);
        // The last chunk ends the utterance the way a user's cut would.
        request.is_manual_cut = i + 1 == chunks.len();

        let result = match aggregator.process(&request) {
            Ok(result) => result,
            Err(e) => {
                eprintln!("chunk {}: {}", i, e);
                process::exit(1);
            }
        };

        if json_output {
            match serde_json::to_string(&result) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("chunk {}: serialize failed: {}", i, e),
            }
            continue;
        }

        if result.reason != ResultReason::Buffering {
            for (segment, job_id) in result.audio_segments.iter().zip(&result.original_job_ids) {
                let len = decode::decode_base64(segment).map(|b| b.len()).unwrap_or(0);
                emitted_batches += 1;
                emitted_bytes += len;
                println!(
                    "chunk {:4}: batch {}ms -> {}",
                    i,
                    pcm::duration_ms(len, sample_rate),
                    job_id
                );
            }
            if result.should_return_empty {
                println!("chunk {:4}: {:?}", i, result.reason);
            }
        }
    }

    if !json_output {
        println!();
        println!(
            "Emitted {} batch(es), {}ms of {}ms input",
            emitted_batches,
            pcm::duration_ms(emitted_bytes, sample_rate),
            duration_ms
        );
    }
}

fn load_wav(path: &str) -> Result<(Vec<i16>, u32), Box<dyn std::error::Error>> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    if spec.channels != 1 {
        return Err(format!("expected mono audio, got {} channels", spec.channels).into());
    }
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err("expected 16-bit integer PCM".into());
    }
    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<i16>, _>>()?;
    Ok((samples, spec.sample_rate))
}
