use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use surfrecon_core::{NormalPoint3d, Point3d, PointCloud, Vector3d};
use surfrecon_reconstruction::{
    create_sphere_volume, reconstruct, ExtractionMethod, MarchingCubes, MarchingCubesConfig,
    RbfConfig, ReconstructionConfig,
};

fn sphere_cloud(num_points: usize) -> PointCloud<NormalPoint3d> {
    let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
    (0..num_points)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / num_points as f64;
            let ring = (1.0 - y * y).sqrt();
            let theta = golden_angle * i as f64;
            let normal = Vector3d::new(ring * theta.cos(), y, ring * theta.sin());
            NormalPoint3d::new(Point3d::from(normal), normal)
        })
        .collect()
}

fn bench_extraction(c: &mut Criterion) {
    let volume = create_sphere_volume([64, 64, 64], [31.5; 3], 20.0).unwrap();
    let mut group = c.benchmark_group("extraction");

    for method in [
        ExtractionMethod::MarchingCubes,
        ExtractionMethod::MarchingTetrahedra,
        ExtractionMethod::DualContouring,
    ] {
        let mc = MarchingCubes::new(MarchingCubesConfig::default().with_method(method));
        group.bench_with_input(BenchmarkId::from_parameter(format!("{:?}", method)), &volume, |b, v| {
            b.iter(|| mc.extract(black_box(v)).unwrap())
        });
    }

    group.finish();
}

fn bench_reconstruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct");
    group.sample_size(10);

    for points in [500, 2000] {
        let cloud = sphere_cloud(points);
        let config = ReconstructionConfig::default()
            .with_rbf(RbfConfig::default().with_support_radius(0.15).with_tolerance(1e-8))
            .with_resolution(32);
        group.bench_with_input(BenchmarkId::from_parameter(points), &cloud, |b, cloud| {
            b.iter(|| reconstruct(black_box(cloud), &config, None).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_extraction, bench_reconstruct);
criterion_main!(benches);
