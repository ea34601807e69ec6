//! Per-frame LOD update benchmarks.
//!
//! The instance tree is converged over a fully loaded directory first, so
//! each iteration measures the steady-state frame: LOD update, texture
//! selection and the front-to-back draw list.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::Vec3;
use terrain_stream::{
  Axis, DirectoryBuilder, InstanceTree, LoaderConfig, LoaderStage, LodConfig, MemorySource, RawKind, ResourceTree,
};

fn tree(depth: u32) -> ResourceTree {
  let terrain = DirectoryBuilder::new(depth)
    .base_chunk_size(16.0)
    .texture(depth.min(5), 4, 4)
    .build(|x, y| (x * 0.01).sin() * (y * 0.01).cos() * 20.0, |level, _, _| [level as u8, 0, 0, 255]);
  let source = MemorySource::from_generated(terrain).expect("generated terrain is well formed");
  let mut tree = ResourceTree::open(Arc::new(source)).expect("generated terrain opens");
  tree.precache(Axis::Geometry).expect("precache geometry");
  tree.precache(Axis::Texture).expect("precache textures");
  tree
}

fn bench_frame(c: &mut Criterion) {
  let mut group = c.benchmark_group("instance_frame");

  for depth in [5u32, 7] {
    let mut tree = tree(depth);
    let mut loader = LoaderStage::<RawKind>::new(LoaderConfig::default());
    let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
    let viewer = Vec3::new(40.0, 40.0, 10.0);
    for _ in 0..32 {
      instance.frame(&mut tree, viewer);
      loader.run_to_idle(&mut tree);
    }

    group.bench_with_input(BenchmarkId::from_parameter(depth), &viewer, |b, &viewer| {
      b.iter(|| black_box(instance.frame(&mut tree, viewer)).draws)
    });
  }
  group.finish();
}

criterion_group!(benches, bench_frame);
criterion_main!(benches);
