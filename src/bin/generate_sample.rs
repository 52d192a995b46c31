use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{Duration, TimeZone, Utc};
use clap::Parser;
use num_complex::Complex64;

use radarqc::data::header::HeaderBlock;
use radarqc::{CsFile, CsFileHeader, Spectrum};

/// Write deterministic synthetic cross-spectra files.
#[derive(Parser, Debug)]
#[command(name = "generate_sample")]
struct Args {
    /// Output directory.
    #[arg(long, default_value = "sample_data")]
    out: PathBuf,
    #[arg(long, default_value_t = 6)]
    count: usize,
    #[arg(long, default_value_t = 31)]
    range_cells: usize,
    #[arg(long, default_value_t = 512)]
    doppler_cells: usize,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Sea echo power at one cell: two first-order Bragg lines either side of
/// zero Doppler, fading with range, over a noise floor.
fn echo_power(range: usize, doppler: usize, num_doppler: usize, rng: &mut SimpleRng) -> f64 {
    let centre = num_doppler as f64 / 2.0;
    let offset = num_doppler as f64 / 8.0;
    let decay = (-(range as f64) / 12.0).exp();
    let d = doppler as f64;
    let signal = gaussian(d, centre - offset, 3.0, 1e-3 * decay) + gaussian(d, centre + offset, 3.0, 6e-4 * decay);
    let noise = 1e-7 * (1.0 + 0.3 * rng.gauss(0.0, 1.0).abs());
    signal + noise
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn header(index: usize, num_range: usize, num_doppler: usize) -> Result<CsFileHeader> {
    let start = Utc
        .with_ymd_and_hms(2021, 6, 1, 0, 0, 0)
        .single()
        .context("invalid start time")?;
    Ok(CsFileHeader {
        version: 6,
        timestamp: start + Duration::minutes(10 * index as i64),
        cskind: 2,
        site_code: "SYNT".to_string(),
        cover_minutes: 10,
        deleted_source: false,
        override_source: false,
        start_freq_mhz: 4.8,
        rep_freq_mhz: 2.0,
        bandwidth_khz: 24.4,
        sweep_up: true,
        num_doppler_cells: i32::try_from(num_doppler)?,
        num_range_cells: i32::try_from(num_range)?,
        first_range_cell: 1,
        range_cell_dist_km: 6.1,
        output_interval: 10,
        create_type_code: "SYNT".to_string(),
        creator_version: "0.1 ".to_string(),
        num_active_channels: 3,
        num_spectra_channels: 3,
        active_channels: 0b111,
        blocks: vec![HeaderBlock {
            key: "TOOL".to_string(),
            data: b"radarqc generate_sample".to_vec(),
        }],
    })
}

fn generate_file(index: usize, args: &Args, rng: &mut SimpleRng) -> Result<CsFile> {
    let (nr, nd) = (args.range_cells, args.doppler_cells);
    let cells = nr * nd;
    // relative antenna gains; loops 1 and 2 see the echo with a bearing-dependent phase
    let gains = [0.6, 0.8, 1.0];
    let phase = [0.0, 0.9, -0.4];

    let mut power = Vec::with_capacity(cells);
    for r in 0..nr {
        for d in 0..nd {
            power.push(echo_power(r, d, nd, rng));
        }
    }
    // every third file carries interference across a band of range cells
    if index % 3 == 2 {
        let d = nd / 3;
        for r in 0..nr / 2 {
            power[r * nd + d] *= 1e4;
        }
    }

    let auto = |k: usize| -> Result<Spectrum> {
        Ok(Spectrum::real(nr, nd, power.iter().map(|p| p * gains[k]).collect())?)
    };
    let cross = |a: usize, b: usize| -> Result<Spectrum> {
        let rel = Complex64::from_polar((gains[a] * gains[b]).sqrt(), phase[a] - phase[b]);
        Ok(Spectrum::complex(nr, nd, power.iter().map(|&p| rel * p).collect())?)
    };
    let quality = Spectrum::real(nr, nd, (0..cells).map(|_| rng.next_f64()).collect())?;

    let file = CsFile::new(
        header(index, nr, nd)?,
        [auto(0)?, auto(1)?, auto(2)?, cross(0, 1)?, cross(0, 2)?, cross(1, 2)?],
        Some(quality),
    )?;
    Ok(file)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);

    std::fs::create_dir_all(&args.out).with_context(|| format!("creating {}", args.out.display()))?;
    for index in 0..args.count {
        let file = generate_file(index, &args, &mut rng)?;
        let stamp = file.header().timestamp.format("%Y_%m_%d_%H%M");
        let path = args.out.join(format!("CSS_{}_{stamp}.cs", file.header().site_code));
        let bytes = file.to_bytes()?;
        std::fs::write(&path, &bytes).with_context(|| format!("writing {}", path.display()))?;
        println!("Wrote {} ({} bytes)", path.display(), bytes.len());
    }
    Ok(())
}
