//! Terrain directory tool.
//!
//! - `generate`: writes a procedural chunk directory and texture quadtree
//! - `inspect`: opens a directory and prints its header and node counts
//! - `simulate`: flies a viewer across a directory, driving the LOD tree,
//!   the loader and a clip stack, and reports per-frame statistics

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use glam::{Vec2, Vec3};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::GenerateConfig;
use terrain_stream::{
	Axis, ClipStack, DirectLookupCache, DirectoryBuilder, FileSource, InstanceTree, LoaderStage, RawKind,
	ResourceTree, StreamConfig, TextureToc,
};

const CHUNK_FILE: &str = "terrain.chu";
const TEXTURE_FILE: &str = "terrain.tqt";

/// Generate, inspect and simulate streamed terrain directories.
#[derive(Parser, Debug)]
#[command(name = "terrain_tool")]
#[command(about = "Generate, inspect and simulate streamed terrain directories")]
struct Args {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Write a procedural terrain directory.
	Generate {
		/// Output directory.
		#[arg(short, long)]
		out: PathBuf,

		/// Generation parameters (TOML); defaults when omitted.
		#[arg(short, long)]
		config: Option<PathBuf>,
	},
	/// Print the header and node statistics of a directory.
	Inspect {
		/// Directory holding terrain.chu and optionally terrain.tqt.
		dir: PathBuf,
	},
	/// Fly a viewer across a directory and report streaming statistics.
	Simulate {
		dir: PathBuf,

		/// Streaming parameters (TOML); defaults when omitted.
		#[arg(short, long)]
		config: Option<PathBuf>,

		/// Frames to simulate.
		#[arg(short, long, default_value_t = 120)]
		frames: u32,

		/// Viewer height above the terrain plane.
		#[arg(long, default_value_t = 20.0)]
		height: f32,
	},
}

fn main() -> Result<()> {
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

	match Args::parse().command {
		Command::Generate { out, config } => generate(&out, config.as_deref()),
		Command::Inspect { dir } => inspect(&dir),
		Command::Simulate {
			dir,
			config,
			frames,
			height,
		} => simulate(&dir, config.as_deref(), frames, height),
	}
}

fn generate(out: &Path, config_path: Option<&Path>) -> Result<()> {
	let config = match config_path {
		Some(path) => GenerateConfig::load(path)?,
		None => GenerateConfig::default(),
	};

	let mut builder = DirectoryBuilder::new(config.tree_depth)
		.base_chunk_size(config.base_chunk_size)
		.vertical_scale(config.vertical_scale)
		.samples_per_chunk(config.samples_per_chunk);
	if config.texture_depth > 0 {
		builder = builder.texture(config.texture_depth, config.tile_size, config.bytes_per_pixel);
	}

	let k = std::f32::consts::TAU / config.wavelength;
	let amplitude = config.amplitude;
	let terrain = builder.build(
		|x, y| amplitude * (x * k).sin() * (y * k).cos(),
		|level, u, v| {
			let ridge = ((u * 7.0).sin() * (v * 5.0).cos() * 0.5 + 0.5) * 255.0;
			[ridge as u8, (u * 255.0) as u8, (v * 255.0) as u8, 0x40 + (level as u8) * 0x20]
		},
	);

	std::fs::create_dir_all(out)
		.with_context(|| format!("Failed to create output dir: {}", out.display()))?;
	let chunk_path = out.join(CHUNK_FILE);
	std::fs::write(&chunk_path, &terrain.chunk_file)
		.with_context(|| format!("Failed to write: {}", chunk_path.display()))?;
	log::info!(
		"wrote {} ({} chunks, {} bytes)",
		chunk_path.display(),
		terrain.header.entry_count,
		terrain.chunk_file.len()
	);

	if let Some(texture) = &terrain.texture_file {
		let texture_path = out.join(TEXTURE_FILE);
		std::fs::write(&texture_path, texture)
			.with_context(|| format!("Failed to write: {}", texture_path.display()))?;
		log::info!("wrote {} ({} bytes)", texture_path.display(), texture.len());
	}
	Ok(())
}

/// Chunk file plus the texture file when present.
fn open_source(dir: &Path) -> Result<(Arc<FileSource>, Option<PathBuf>)> {
	let chunk_path = dir.join(CHUNK_FILE);
	let texture_path = Some(dir.join(TEXTURE_FILE)).filter(|p| p.exists());
	let source = FileSource::open(Some(&chunk_path), texture_path.as_deref())
		.with_context(|| format!("Failed to open terrain directory: {}", dir.display()))?;
	Ok((Arc::new(source), texture_path))
}

fn inspect(dir: &Path) -> Result<()> {
	let (source, _) = open_source(dir)?;
	let tree: ResourceTree = ResourceTree::open(source).context("Failed to read chunk directory")?;
	let header = tree.header();

	println!("tree depth:       {}", header.tree_depth);
	println!("entries:          {}", header.entry_count);
	println!("base chunk size:  {}", header.base_chunk_size);
	println!("vertical scale:   {}", header.vertical_scale);
	println!("base max error:   {}", header.base_max_error);
	println!("collision depth:  {}", header.collision_depth);
	if tree.texture_depth() > 0 {
		println!("texture depth:    {} ({}px tiles)", tree.texture_depth(), tree.tile_size());
	} else {
		println!("texture depth:    none");
	}

	let mut per_level = vec![0usize; header.tree_depth as usize];
	for h in tree.handles() {
		per_level[tree.node(h).level as usize] += 1;
	}
	for (level, count) in per_level.iter().enumerate() {
		println!("  level {level}: {count} nodes ({} world units)", tree.chunk_size(level as u32));
	}
	Ok(())
}

fn simulate(dir: &Path, config_path: Option<&Path>, frames: u32, height: f32) -> Result<()> {
	let config = match config_path {
		Some(path) => StreamConfig::load(path)
			.with_context(|| format!("Failed to load stream config: {}", path.display()))?,
		None => StreamConfig::default(),
	};

	let (source, texture_path) = open_source(dir)?;
	let mut tree: ResourceTree = ResourceTree::open(source).context("Failed to read chunk directory")?;
	let mut loader = LoaderStage::<RawKind>::new(config.loader.clone());
	let mut instance = InstanceTree::attach(&mut tree, config.lod.clone());

	let mut stack = match texture_path {
		Some(path) => {
			let texture = FileSource::open(None, Some(&path))
				.with_context(|| format!("Failed to open: {}", path.display()))?;
			let toc: TextureToc<RawKind> = TextureToc::open(Arc::new(texture), config.loader.clone())
				.context("Failed to open texture quadtree")?;
			Some(ClipStack::new(&config.clipmap, DirectLookupCache::new(toc)).context("Failed to build clip stack")?)
		}
		None => None,
	};

	let world = tree.chunk_size(0);
	for frame in 0..frames {
		// Diagonal pass from one corner to the other.
		let t = frame as f32 / frames.max(1) as f32;
		let ground = Vec2::splat(world * (0.05 + 0.9 * t));
		let viewer = Vec3::new(ground.x, ground.y, height);

		let lod = instance.frame(&mut tree, viewer);
		loader.pump(&mut tree);

		let recenter = stack.as_mut().map(|s| s.recenter(ground / world));
		log::info!(
			"frame {frame:>4}: draws {:>4} splits {:>3} in flight {} | clip texels {} skipped {}",
			lod.draws,
			lod.nodes_split,
			loader.in_flight(),
			recenter.map_or(0, |r| r.texels),
			recenter.map_or(0, |r| r.levels_skipped),
		);
	}

	loader.run_to_idle(&mut tree);
	let stats = loader.stats();
	println!("loads started:    {}", stats.started);
	println!("loads installed:  {}", stats.installed);
	println!("loads discarded:  {}", stats.discarded);
	println!("loads failed:     {}", stats.failed);
	if stats.started > 0 {
		println!("avg load time:    {:.1}us", stats.load_time_us as f64 / stats.started as f64);
	}
	println!("resident geometry: {}", tree.resident_count(Axis::Geometry));
	println!("resident textures: {}", tree.resident_count(Axis::Texture));
	if let Some(stack) = &stack {
		println!(
			"clip stack:       {} levels, {} texels uploaded",
			stack.depth(),
			stack.texels_updated()
		);
	}

	instance.detach(&mut tree);
	Ok(())
}
