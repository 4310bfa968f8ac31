#![warn(unused_extern_crates)]
use anyhow::{Error, Result};
use clap::{Args, Parser, Subcommand};
use facewarp::{
    AffineMatrix, EngineConfig, FaceEngine, LANDMARK_COUNT, Landmarks, Padding, PointF32, WarpSize,
};
use image::RgbImage;
use std::num::ParseFloatError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;
use tracing::{Level, debug, info, span};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the aligned face crop
    Align {
        #[command(flatten)]
        face: FaceArgs,
    },
    /// Align, then paste the untouched crop back to preview the blend mask
    Roundtrip {
        #[command(flatten)]
        face: FaceArgs,

        /// Mask blur ratio
        #[arg(long, default_value = "0.3")]
        blur: f64,

        /// Mask padding as top,right,bottom,left fractions
        #[arg(long, default_value = "0,0,0,0", value_parser = parse_padding)]
        padding: Padding,
    },
    /// Print the anchor grid for one detector level
    Anchors {
        #[arg(long)]
        stride: u32,

        #[arg(long, default_value = "2")]
        anchors: u32,

        #[arg(long)]
        height: u32,

        #[arg(long)]
        width: u32,
    },
}

#[derive(Args, Debug)]
struct FaceArgs {
    /// Source image
    #[arg(short, long)]
    input: PathBuf,

    /// Five landmarks as x1,y1,...,x5,y5 (eyes, nose, mouth corners)
    #[arg(short, long, value_parser = parse_keypoints, allow_hyphen_values = true)]
    keypoints: Landmarks,

    #[arg(short, long, default_value = "arcface_v2")]
    template: String,

    /// Width the template is expressed at
    #[arg(long, default_value = "112")]
    working_size: u32,

    /// Side of the square crop
    #[arg(long, default_value = "112")]
    output_size: u32,

    /// Where to write the result
    #[arg(short, long)]
    output: PathBuf,
}

fn parse_floats<F>(s: &str) -> Result<Vec<F>>
where
    F: FromStr<Err = ParseFloatError>,
{
    s.split(',')
        .map(|v| v.trim().parse::<F>().map_err(Error::from))
        .collect()
}

fn parse_keypoints(s: &str) -> Result<Landmarks> {
    let values: Vec<f32> = parse_floats(s)?;
    if values.len() != LANDMARK_COUNT * 2 {
        return Err(Error::msg(format!(
            "expected {} comma separated values, got {}",
            LANDMARK_COUNT * 2,
            values.len()
        )));
    }

    let mut points = [PointF32::default(); LANDMARK_COUNT];
    for (p, xy) in points.iter_mut().zip(values.chunks_exact(2)) {
        *p = PointF32::new(xy[0], xy[1]);
    }
    Ok(points)
}

fn parse_padding(s: &str) -> Result<Padding> {
    let values: [f64; 4] = parse_floats(s)?
        .try_into()
        .map_err(|v: Vec<f64>| Error::msg(format!("expected 4 padding values, got {}", v.len())))?;
    Ok(values.into())
}

fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let args = CmdArgs::parse();
    let engine = FaceEngine::new(EngineConfig::default());

    match args.command {
        Command::Align { face } => {
            let img = image::open(&face.input)?.into_rgb8();
            let (crop, _) = align(&engine, &img, &face)?;
            crop.save(&face.output)?;
            info!("Aligned crop at {:?}", face.output);
        }
        Command::Roundtrip {
            face,
            blur,
            padding,
        } => {
            let span = span!(Level::INFO, "roundtrip");
            let _guard = span.enter();

            let img = image::open(&face.input)?.into_rgb8();
            let (crop, matrix) = align(&engine, &img, &face)?;

            let start = Instant::now();
            let composited = engine.paste_back(&img, &crop, &matrix, blur, padding)?;
            debug!("Paste back took {:?}", start.elapsed());

            composited.save(&face.output)?;
            info!("Composited frame at {:?}", face.output);
        }
        Command::Anchors {
            stride,
            anchors,
            height,
            width,
        } => {
            for row in engine.anchors(stride, anchors, height, width).rows() {
                println!("{} {}", row[0], row[1]);
            }
        }
    }

    Ok(())
}

fn align(
    engine: &FaceEngine,
    img: &RgbImage,
    face: &FaceArgs,
) -> Result<(RgbImage, AffineMatrix)> {
    let start = Instant::now();
    let (crop, matrix) = engine.warp_face(
        img,
        &face.keypoints,
        &face.template,
        WarpSize::new(face.working_size, face.output_size),
    )?;
    debug!(?matrix, "Alignment took {:?}", start.elapsed());

    Ok((crop, matrix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keypoints() {
        let kps = parse_keypoints("1,2, 3,4,5,6,7,8,9,-10").unwrap();
        assert_eq!(kps[1], PointF32::new(3., 4.));
        assert_eq!(kps[4], PointF32::new(9., -10.));

        assert!(parse_keypoints("1,2,3").is_err());
        assert!(parse_keypoints("1,2,3,4,5,6,7,8,9,x").is_err());
    }

    #[test]
    fn test_parse_padding() {
        assert_eq!(
            parse_padding("0.1,0,0.2,0").unwrap(),
            Padding::new(0.1, 0., 0.2, 0.)
        );
        assert!(parse_padding("0.1,0").is_err());
        assert_eq!(parse_padding("0.7,0,0,0").unwrap().top, 0.7);
    }
}
