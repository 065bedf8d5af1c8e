use clap::{Parser, Subcommand};
use gpu_decode_client::gpu_decode_types::SessionOptions;
use gpu_decode_client::{default_library_path, load, ClientError, Frame};
use std::fs;
use std::path::{Path, PathBuf};
use turbojpeg::{Compressor, Subsamp};

/// Splits a packed NV12 buffer (`[h + ceil(h/2), even_width]`) into I420 planes.
fn nv12_to_i420(data: &[u8], cols: usize, width: usize, height: usize) -> Vec<u8> {
    let chroma_width = (width + 1) / 2;
    let chroma_height = (height + 1) / 2;

    let mut pixels = Vec::with_capacity(width * height + 2 * chroma_width * chroma_height);
    for row in data.chunks(cols).take(height) {
        pixels.extend_from_slice(&row[..width]);
    }

    let uv_rows = &data[cols * height..];
    let mut v_plane = Vec::with_capacity(chroma_width * chroma_height);
    for row in uv_rows.chunks(cols).take(chroma_height) {
        for pair in row[..chroma_width * 2].chunks(2) {
            pixels.push(pair[0]);
            v_plane.push(pair[1]);
        }
    }
    pixels.extend_from_slice(&v_plane);
    pixels
}

fn get_jpeg_buffer(frame: &Frame) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let [_, cols] = frame.shape();

    let data = frame.download()?;
    let pixels = nv12_to_i420(&data, cols, width, height);

    let mut compressor = Compressor::new()?;
    let yuv_image = turbojpeg::YuvImage {
        pixels,
        width,
        height,
        subsamp: Subsamp::Sub2x2,
        align: 1, // planes are tightly packed
    };

    Ok(compressor.compress_yuv_to_vec(yuv_image.as_deref())?)
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Decode every frame of a video on the GPU
    Frames {
        input: PathBuf,
        #[arg(long, default_value_t = 0)]
        device: u32,
        /// Give up when this many chunks yield no frame (0 = never)
        #[arg(long, default_value_t = 0)]
        max_chunks_per_frame: u32,
        #[arg(long)]
        max_frames: Option<usize>,
        /// Write each frame as JPEG into this directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Parser)]
struct Cli {
    /// Path to the decode library, overrides GPU_DECODE_LIB_PATH
    #[arg(long)]
    lib: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let lib_path = cli.lib.unwrap_or_else(default_library_path);
    let client = load(&lib_path)?;
    client.init_logging();

    match cli.command {
        Command::Frames {
            input,
            device,
            max_chunks_per_frame,
            max_frames,
            output_dir,
        } => {
            if let Some(output_dir) = &output_dir {
                fs::create_dir_all(output_dir)?;
            }

            let mut session = client.open(
                &input,
                SessionOptions {
                    device_index: device,
                    max_chunks_per_frame,
                },
            )?;
            if let Some(metadata) = session.metadata() {
                println!(
                    "{}: {}x{} @ {}/{} fps, {} us",
                    input.display(),
                    metadata.width,
                    metadata.height,
                    metadata.fps_num,
                    metadata.fps_den,
                    metadata.duration_us
                );
            }

            let mut i = 0;
            while max_frames.map_or(true, |max| i < max) {
                let frame = session.decode()?;
                if frame.is_empty() {
                    println!("End of stream");
                    break;
                }
                let [rows, cols] = frame.shape();
                println!(
                    "Frame {}: pts {} shape [{}, {}] on cuda:{}",
                    i,
                    frame.pts(),
                    rows,
                    cols,
                    frame.device_index()
                );

                if let Some(output_dir) = &output_dir {
                    let output_path = Path::new(output_dir).join(format!("{}.jpeg", i));
                    fs::write(output_path, get_jpeg_buffer(&frame)?)?;
                }
                i += 1;
            }

            session.close()?;
            println!("Decoded {} frames", i);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        if let Some(ClientError::MediaLibError(lib_error)) = e.downcast_ref::<ClientError>() {
            eprintln!("Kind: {}", lib_error.kind());
        }
        std::process::exit(1);
    }
}
