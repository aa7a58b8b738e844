//! Graphviz `.dot` serialisation of a rendered block graph.
//!
//! A direct, readable port of `original_source/src/tracker.c`'s
//! `agnode`/`agedge` calls against `libgraphviz`, expressed as plain text
//! instead of linking `libgraphviz` — this system's graph export target is
//! the textual format the `dot` tool itself consumes, so no FFI is needed.

use std::io::{self, Write};

use tracker_core::{BlockGraph, FunctionId};

/// Write one function's block graph as a standalone digraph, labeled with
/// its function id so multiple functions can be told apart when concatenated
/// into one file.
pub fn write_function(out: &mut impl Write, function_id: FunctionId, graph: &BlockGraph) -> io::Result<()> {
    writeln!(out, "digraph func_{function_id} {{")?;
    writeln!(out, "    node [shape=box, fontname=\"monospace\"];")?;

    for block in &graph.blocks {
        writeln!(
            out,
            "    b{} [label=\"{}\"];",
            block.id.index(),
            escape(&block.label)
        )?;
    }

    for (from, to) in graph.edges() {
        writeln!(out, "    b{} -> b{};", from.index(), to.index())?;
    }

    writeln!(out, "}}")
}

/// Write every function's block graph to `out`, one `digraph` statement each.
pub fn write_all(out: &mut impl Write, graphs: &[BlockGraph]) -> io::Result<()> {
    for (id, graph) in graphs.iter().enumerate() {
        write_function(out, id as FunctionId, graph)?;
        writeln!(out)?;
    }
    Ok(())
}

/// Escape characters that would otherwise break a quoted Graphviz label.
fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\l")
}
