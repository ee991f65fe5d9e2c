use anyhow::{ensure, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use ctvm::tomo_image::Image;
use ctvm::tomo_scan::{projection_matrix, read_tilt_angles, Sinogram};
use ctvm::tval3_solver::{reconstruct, SolverParams, Status};

////////////////////////////////////////////////////////////////////////
// Main entry point
//

/// Recover an image from an electron-tomography sinogram via TVAL3.
#[derive(Parser)]
#[command(name = "ctvm-recover", version)]
struct Opts {
    /// Grayscale sinogram image: one column per tilt angle, one
    /// detector bin per row.
    sinogram_image: PathBuf,
    /// Text file of tilt angles, in radians.
    tilt_angles: PathBuf,
    /// File to write the recovered image to.
    recovered_output: PathBuf,
    /// Seed for the stand-in random projection operator (for
    /// reproducibility).
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn run(opts: &Opts) -> Result<()> {
    let sinogram = Sinogram::load(&opts.sinogram_image)?;
    eprintln!(
        "Loaded a {} x {} sinogram from {}.",
        sinogram.side,
        sinogram.angles,
        opts.sinogram_image.display()
    );

    let tilt_angles = read_tilt_angles(&opts.tilt_angles)?;
    ensure!(
        tilt_angles.len() == sinogram.angles,
        "sinogram has {} angle columns but {} tilt angles were supplied",
        sinogram.angles,
        tilt_angles.len()
    );

    let a = projection_matrix(&tilt_angles, sinogram.side, opts.seed);
    let b = sinogram.measurements();

    eprint!("Reconstructing... ");
    let recovered = reconstruct(&a, &b, sinogram.side, SolverParams::default())?;
    eprintln!("done.");
    if recovered.status == Status::DidNotConverge {
        eprintln!("Iteration cap reached; writing the final iterate anyway.");
    }

    Image::from_matrix(&recovered.image).save(&opts.recovered_output)
}

fn main() -> ExitCode {
    env_logger::init();

    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(err) if err.use_stderr() => {
            eprintln!("{}", err);
            return ExitCode::from(1);
        }
        Err(err) => {
            // --help and --version land here.
            print!("{}", err);
            return ExitCode::SUCCESS;
        }
    };

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
    }
}
