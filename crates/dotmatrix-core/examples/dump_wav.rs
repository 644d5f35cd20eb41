use std::env;
use std::fs;
use std::path::Path;

use dotmatrix_core::{EmulatorConfig, Event, GameBoy, ModelPreference};

const DEFAULT_SECONDS: f64 = 3.0;
const SAMPLE_RATE: u32 = 44_100;
const USAGE: &str = "expected <rom> <output wav> [--seconds=N] [--cgb|--dmg]";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let rom_path = args.next().ok_or(USAGE)?;
    let out_path = args.next().ok_or(USAGE)?;

    let mut seconds = DEFAULT_SECONDS;
    let mut model = ModelPreference::Auto;
    for arg in args {
        if let Some(value) = arg.strip_prefix("--seconds=") {
            seconds = value.parse()?;
        } else if arg == "--cgb" {
            model = ModelPreference::Cgb;
        } else if arg == "--dmg" {
            model = ModelPreference::Dmg;
        } else {
            return Err(format!("unrecognised flag: {arg}").into());
        }
    }
    if seconds <= 0.0 {
        return Err("seconds must be positive".into());
    }

    let config = EmulatorConfig::default()
        .with_model(model)
        .with_sample_rate(SAMPLE_RATE);
    let mut gb = GameBoy::new(config);
    gb.load_cartridge(fs::read(&rom_path)?)?;

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let out = Path::new(&out_path);
    if let Some(parent) = out
        .parent()
        .and_then(|p| (!p.as_os_str().is_empty()).then_some(p))
    {
        fs::create_dir_all(parent)?;
    }
    let mut writer = hound::WavWriter::create(out, spec)?;

    let total_samples = (seconds * SAMPLE_RATE as f64).ceil() as usize * 2;
    let mut written = 0usize;
    while written < total_samples {
        gb.run_frame()?;
        for event in gb.drain_events() {
            let Event::AudioBufferReady(samples) = event else {
                continue;
            };
            for sample in samples.into_iter().take(total_samples - written) {
                writer.write_sample(sample)?;
                written += 1;
            }
        }
    }
    writer.finalize()?;

    println!(
        "wrote {} stereo frames ({seconds:.2}s) to {}",
        written / 2,
        out.display()
    );
    Ok(())
}
