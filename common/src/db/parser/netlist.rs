//! Line-oriented netlist format for routing benchmarks.
//!
//! ```text
//! # comment
//! grid <width> <height> <tracks>
//! net <name> [global] [ignored] source <x> <y> sinks <x> <y> [<x> <y> ...]
//! ```
//!
//! Terminal RR nodes are assigned deterministically: pin ordinal `p` of a net
//! lands on track `p % tracks` of its tile, so the same file always yields the
//! same routing problem.

use crate::db::core::NetlistDB;
use crate::db::rr_graph::RRGraph;

pub fn parse(path: &str) -> Result<(RRGraph, NetlistDB), String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read netlist '{}': {}", path, e))?;
    parse_str(&text)
}

pub fn parse_str(text: &str) -> Result<(RRGraph, NetlistDB), String> {
    let mut rr: Option<RRGraph> = None;
    let mut db = NetlistDB::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let err = |msg: &str| format!("netlist line {}: {}", lineno + 1, msg);

        match tokens.next() {
            Some("grid") => {
                let mut next_int = |name: &str| -> Result<i32, String> {
                    tokens
                        .next()
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| err(&format!("bad or missing {}", name)))
                };
                let w = next_int("width")?;
                let h = next_int("height")?;
                let t = next_int("tracks")?;
                if w <= 0 || h <= 0 || t <= 0 {
                    return Err(err("grid dimensions must be positive"));
                }
                rr = Some(RRGraph::uniform(w, h, t as usize));
            }
            Some("net") => {
                let rr = rr.as_ref().ok_or_else(|| err("net before grid line"))?;
                let name = tokens.next().ok_or_else(|| err("missing net name"))?;

                let mut is_global = false;
                let mut is_ignored = false;
                let mut tok = tokens.next();
                while let Some(t) = tok {
                    match t {
                        "global" => is_global = true,
                        "ignored" => is_ignored = true,
                        "source" => break,
                        other => return Err(err(&format!("unexpected token '{}'", other))),
                    }
                    tok = tokens.next();
                }
                if tok != Some("source") {
                    return Err(err("expected 'source'"));
                }

                let coords: Vec<i32> = {
                    let mut v = Vec::new();
                    let mut saw_sinks = false;
                    for t in tokens {
                        if t == "sinks" {
                            saw_sinks = true;
                            continue;
                        }
                        v.push(
                            t.parse()
                                .map_err(|_| err(&format!("bad coordinate '{}'", t)))?,
                        );
                    }
                    if !saw_sinks {
                        return Err(err("expected 'sinks'"));
                    }
                    v
                };
                if coords.len() < 4 || coords.len() % 2 != 0 {
                    return Err(err("expected source x y and at least one sink x y"));
                }

                let mut terminals = Vec::with_capacity(coords.len() / 2);
                for (p, xy) in coords.chunks(2).enumerate() {
                    let (x, y) = (xy[0], xy[1]);
                    if x < 0 || x >= rr.width() || y < 0 || y >= rr.height() {
                        return Err(err(&format!("pin ({}, {}) outside grid", x, y)));
                    }
                    terminals.push(rr.node_at(x, y, p % rr.tracks()));
                }

                let id = db.add_net(name.to_string(), terminals);
                db.nets[id.index()].is_global = is_global;
                db.nets[id.index()].is_ignored = is_ignored;
            }
            Some(other) => return Err(err(&format!("unknown record '{}'", other))),
            None => unreachable!(),
        }
    }

    let rr = rr.ok_or_else(|| "netlist has no grid line".to_string())?;
    Ok((rr, db))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grid_and_nets() {
        let text = "\
# tiny fixture
grid 8 8 2
net a source 0 0 sinks 3 3 7 0
net clk global source 4 4 sinks 1 1
";
        let (rr, db) = parse_str(text).unwrap();
        assert_eq!(rr.width(), 8);
        assert_eq!(db.num_nets(), 2);

        let a = db.net_name_map["a"];
        assert_eq!(db.net_sinks(a), 2);
        assert_eq!(rr.node_xlow(db.net_source(a)), 0);
        assert_eq!(rr.node_xlow(db.net_sink_rr(a, 2)), 7);

        let clk = db.net_name_map["clk"];
        assert!(db.net_is_global(clk));
        // Pin ordinals alternate tracks.
        assert_eq!(db.net_source(clk), rr.node_at(4, 4, 0));
        assert_eq!(db.net_sink_rr(clk, 1), rr.node_at(1, 1, 1));
    }

    #[test]
    fn rejects_out_of_grid_pins() {
        let text = "grid 4 4 1\nnet a source 0 0 sinks 9 9\n";
        assert!(parse_str(text).is_err());
    }

    #[test]
    fn rejects_net_before_grid() {
        assert!(parse_str("net a source 0 0 sinks 1 1\n").is_err());
    }
}
