// Renders `netrules.1` and one page per visible subcommand into
// `$OUT_DIR/man` for packaging.

use std::io;
use std::path::{Path, PathBuf};

use clap::CommandFactory;

#[path = "src/cli.rs"]
#[allow(dead_code, reason = "argument fields are only read by the binary")]
mod cli;

fn main() -> io::Result<()> {
    println!("cargo::rerun-if-changed=src/cli.rs");

    let out_dir = std::env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::other("OUT_DIR is not set"))?;
    let man_dir = out_dir.join("man");
    std::fs::create_dir_all(&man_dir)?;

    render_pages(&cli::Cli::command(), &man_dir)
}

/// Write `cmd`'s page, then recurse as `<parent>-<sub>` pages.
fn render_pages(cmd: &clap::Command, dir: &Path) -> io::Result<()> {
    let name = cmd.get_name().to_owned();
    let mut page = Vec::new();
    clap_mangen::Man::new(cmd.clone()).render(&mut page)?;
    std::fs::write(dir.join(format!("{name}.1")), page)?;

    for sub in cmd.get_subcommands().filter(|s| !s.is_hide_set()) {
        let sub = sub.clone().name(format!("{name}-{}", sub.get_name()));
        render_pages(&sub, dir)?;
    }
    Ok(())
}
