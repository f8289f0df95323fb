//! j2kcodec CLI - JPEG 2000 codestream inspection and raw-sample transport.
//!
//! Works on bare J2K codestreams (SOC..EOC). Encoding and decoding use the
//! built-in raw tile coder, which stores samples verbatim; the tool is meant
//! for exercising and inspecting the codestream layer, not for compression.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use j2kcodec::{
    CompressionParameters, DecoderParams, Image, ImageComponent, J2kDecoder, J2kEncoder,
    NullTileCoder, RawTileCoder,
};

/// JPEG 2000 codestream tool
#[derive(Parser)]
#[command(name = "j2kcodec")]
#[command(version)]
#[command(about = "Inspect, build and unpack JPEG 2000 codestreams", long_about = None)]
#[command(after_help = "EXAMPLES:
    j2kcodec info -i image.j2k
    j2kcodec encode -i pixels.raw -o image.j2k -w 512 -H 512
    j2kcodec decode -i image.j2k -o pixels.raw

Raw sample files are planar, one unsigned byte per sample, components in
order.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display codestream structure: geometry, coding parameters, tile-parts
    #[command(visible_alias = "i")]
    Info {
        /// Input codestream file
        #[arg(short, long)]
        input: PathBuf,

        /// Also list every tile-part span and side-table entry
        #[arg(short, long)]
        extended: bool,
    },

    /// Wrap raw planar 8-bit samples in a codestream
    #[command(visible_alias = "e")]
    Encode {
        /// Input raw sample file
        #[arg(short, long)]
        input: PathBuf,

        /// Output codestream file
        #[arg(short, long)]
        output: PathBuf,

        /// Image width in pixels
        #[arg(short, long)]
        width: u32,

        /// Image height in pixels
        #[arg(short = 'H', long)]
        height: u32,

        /// Number of components
        #[arg(short = 'n', long, default_value = "1")]
        components: u32,

        /// Tile size (edge length); 0 means a single full-image tile
        #[arg(short, long, default_value = "0")]
        tile_size: u32,

        /// Emit a TLM side-table in the main header
        #[arg(long)]
        tlm: bool,
    },

    /// Unpack a codestream back to raw planar 8-bit samples
    #[command(visible_alias = "d")]
    Decode {
        /// Input codestream file
        #[arg(short, long)]
        input: PathBuf,

        /// Output raw sample file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Info { input, extended } => show_info(&input, extended),
        Commands::Encode {
            input,
            output,
            width,
            height,
            components,
            tile_size,
            tlm,
        } => encode(&input, &output, width, height, components, tile_size, tlm),
        Commands::Decode { input, output } => decode(&input, &output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn show_info(input: &PathBuf, extended: bool) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!();

    let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
    decoder.read_header()?;
    {
        let image = decoder.image();
        println!("Image area:  ({}, {}) - ({}, {})", image.x0, image.y0, image.x1, image.y1);
        println!("Dimensions:  {}x{}", image.width(), image.height());
        println!("Components:  {}", image.comps.len());
        for (i, comp) in image.comps.iter().enumerate() {
            println!(
                "  [{i}] {} bits {}, subsampling {}x{}",
                comp.prec,
                if comp.signed { "signed" } else { "unsigned" },
                comp.dx,
                comp.dy
            );
        }
    }
    let cp = decoder.coding_parameters();
    println!("Tile grid:   {}x{} tiles of {}x{}", cp.tw, cp.th, cp.tdx, cp.tdy);
    println!("Rsiz:        0x{:04x}", cp.rsiz);
    if let Some(comment) = &cp.comment {
        println!("Comment:     {}", comment);
    }

    // Structural scan: walks every tile-part without touching payloads.
    decoder.decode(&mut NullTileCoder)?;
    let cp = decoder.coding_parameters();
    let tcp = &cp.tcps[0];
    let tccp = &tcp.tccps[0];
    println!("Progression: {:?}", tcp.prg);
    println!("Layers:      {}", tcp.numlayers);
    println!("DWT levels:  {}", tccp.numresolutions - 1);
    println!(
        "Code-blocks: {}x{}",
        1u32 << tccp.cblkw,
        1u32 << tccp.cblkh
    );

    let index = decoder.codestream_index();
    println!("Main header: {} bytes", index.main_header_end - index.main_header_start);
    let total_parts: usize = index.tiles.iter().map(|t| t.tile_parts.len()).sum();
    println!("Tile-parts:  {}", total_parts);
    if !index.tlm_entries.is_empty() {
        println!("TLM entries: {}", index.tlm_entries.len());
    }
    if extended {
        for (tile, entry) in index.tiles.iter().enumerate() {
            for (part, span) in entry.tile_parts.iter().enumerate() {
                println!(
                    "  tile {tile} part {part}: offset {} header {} payload {}",
                    span.start,
                    span.data_start - span.start,
                    span.end - span.data_start
                );
            }
            if !entry.packet_lengths.is_empty() {
                println!("  tile {tile} PLT packets: {}", entry.packet_lengths.len());
            }
        }
        for entry in &index.tlm_entries {
            match entry.tile {
                Some(tile) => println!("  TLM tile {tile}: {} bytes", entry.length),
                None => println!("  TLM (in order): {} bytes", entry.length),
            }
        }
    }
    Ok(())
}

fn encode(
    input: &PathBuf,
    output: &PathBuf,
    width: u32,
    height: u32,
    components: u32,
    tile_size: u32,
    tlm: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = fs::read(input)?;
    let plane = (width * height) as usize;
    if raw.len() != plane * components as usize {
        return Err(format!(
            "expected {} bytes of raw samples, file has {}",
            plane * components as usize,
            raw.len()
        )
        .into());
    }

    let comps: Vec<ImageComponent> = (0..components as usize)
        .map(|c| ImageComponent {
            dx: 1,
            dy: 1,
            prec: 8,
            signed: false,
            factor: 0,
            data: Some(raw[c * plane..(c + 1) * plane].iter().map(|&b| b as i32).collect()),
        })
        .collect();
    let image = Image::new(0, 0, width, height, comps)?;

    let params = CompressionParameters {
        tile_size_on: tile_size > 0,
        tdx: tile_size,
        tdy: tile_size,
        write_tlm: tlm,
        ..Default::default()
    };
    let mut encoder = J2kEncoder::new(&params, &image)?;
    // Raw 32-bit samples plus header room.
    let mut buffer = vec![0u8; raw.len() * 4 + 65536];
    let len = encoder.encode(&mut RawTileCoder, &mut buffer)?;
    buffer.truncate(len);

    fs::write(output, &buffer)?;
    println!("Encoded {}x{} image ({} components) to {:?}, {} bytes", width, height, components, output, len);
    Ok(())
}

fn decode(input: &PathBuf, output: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let mut decoder = J2kDecoder::new(&data, DecoderParams::default());
    decoder.decode(&mut RawTileCoder)?;
    let image = decoder.into_image();

    let mut raw = Vec::new();
    for compno in 0..image.comps.len() {
        let samples = image.comps[compno]
            .data
            .as_ref()
            .ok_or("tile payloads carried no samples for this component")?;
        raw.extend(samples.iter().map(|&s| s.clamp(0, 255) as u8));
    }
    fs::write(output, &raw)?;
    println!(
        "Decoded {}x{} image ({} components) to {:?}",
        image.width(),
        image.height(),
        image.comps.len(),
        output
    );
    Ok(())
}
