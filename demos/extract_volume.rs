//! Extract an isosurface from a raw 16-bit volume
//!
//! Usage: `extract_volume [<file.vol> <size_x> <size_y> <size_z>]`
//!
//! Without arguments a synthetic sphere volume is used. The isovalue is
//! chosen with Otsu's method.

use anyhow::Context;
use surfrecon_reconstruction::{
    create_sphere_volume, otsu_threshold, MarchingCubes, MarchingCubesConfig, Volume,
};
use tracing_subscriber::EnvFilter;

fn load_volume(args: &[String]) -> anyhow::Result<Volume> {
    match args {
        [path, sx, sy, sz] => {
            let size = |s: &String| s.parse::<usize>().with_context(|| format!("bad size {:?}", s));
            let volume = Volume::read_raw(path, size(sx)?, size(sy)?, size(sz)?)
                .with_context(|| format!("reading {}", path))?;
            Ok(volume)
        }
        [] => Ok(create_sphere_volume([32, 32, 32], [15.5, 15.5, 15.5], 10.0)?),
        _ => anyhow::bail!("usage: extract_volume [<file.vol> <size_x> <size_y> <size_z>]"),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let volume = load_volume(&args)?;
    println!("Volume dimensions: {:?}", volume.dimensions());

    let threshold = otsu_threshold(&volume);
    tracing::info!(threshold, "selected isovalue with Otsu's method");
    println!("Otsu threshold: {:.5}", threshold);

    let mc = MarchingCubes::new(MarchingCubesConfig::default().with_otsu());
    let mesh = mc.extract(&volume)?;
    println!("Extracted {} vertices, {} faces", mesh.vertex_count(), mesh.face_count());

    Ok(())
}
