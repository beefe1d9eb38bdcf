//! Mermaid rendering of the pipeline's state machine, written for debugging.

use anyhow::{Context, Result};
use std::path::Path;

use super::state::Stage;

/// Nodes in execution order, with the stage each one leaves behind
const NODES: [(&str, Stage); 3] = [
    ("write_query", Stage::Drafted),
    ("execute_query", Stage::Executed),
    ("generate_answer", Stage::Answered),
];

pub fn mermaid() -> String {
    let mut out = String::from("%%{init: {'flowchart': {'curve': 'linear'}}}%%\ngraph TD;\n");
    out.push_str("\t__start__([<p>__start__</p>]):::first\n");
    for (name, stage) in NODES {
        out.push_str(&format!("\t{}({}<br/><i>{}</i>)\n", name, name, stage));
    }
    out.push_str("\t__end__([<p>__end__</p>]):::last\n");
    out.push_str("\tcancelled([CANCELLED]):::last\n");

    out.push_str("\t__start__ --> write_query;\n");
    out.push_str("\twrite_query -. \"approve (interrupt)\" .-> execute_query;\n");
    out.push_str("\twrite_query -. reject .-> cancelled;\n");
    out.push_str("\texecute_query --> generate_answer;\n");
    out.push_str("\tgenerate_answer --> __end__;\n");

    out.push_str("\tclassDef default fill:#f2f0ff,line-height:1.2\n");
    out.push_str("\tclassDef first fill-opacity:0\n");
    out.push_str("\tclassDef last fill:#bfb6fc\n");
    out
}

/// Write the diagram to `path`, creating parent directories
pub fn save_graph(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, mermaid()).with_context(|| format!("writing graph to {}", path.display()))?;
    tracing::info!("pipeline graph saved to {}", path.display());
    Ok(())
}
