use rand::Rng;
use std::fs::File;
use std::io::Write;

/// Write a random routing benchmark in the netlist text format.
///
/// Most nets are local: their sinks fall in a window around the source, sized
/// so that a spatial partitioner has nets to distribute. A small fraction span
/// the whole device to exercise decomposition.
pub fn generate_random_netlist(
    filename: &str,
    num_nets: usize,
    grid: i32,
    tracks: usize,
) -> std::io::Result<()> {
    let mut file = File::create(filename)?;
    let mut rng = rand::thread_rng();

    log::info!(
        "Generating benchmark: {} nets on a {}x{} grid, {} tracks",
        num_nets,
        grid,
        grid,
        tracks
    );

    writeln!(file, "# random routing benchmark")?;
    writeln!(file, "grid {} {} {}", grid, grid, tracks)?;

    let window = (grid / 4).max(2);

    for i in 0..num_nets {
        let spanning = i % 20 == 0;
        let fanout = if spanning {
            rng.gen_range(8..=16)
        } else {
            rng.gen_range(1..=6)
        };

        let sx = rng.gen_range(0..grid);
        let sy = rng.gen_range(0..grid);
        write!(file, "net n{} source {} {} sinks", i, sx, sy)?;

        for _ in 0..fanout {
            let (x, y) = if spanning {
                (rng.gen_range(0..grid), rng.gen_range(0..grid))
            } else {
                (
                    (sx + rng.gen_range(-window..=window)).clamp(0, grid - 1),
                    (sy + rng.gen_range(-window..=window)).clamp(0, grid - 1),
                )
            };
            write!(file, " {} {}", x, y)?;
        }
        writeln!(file)?;
    }
    Ok(())
}
