use crate::error::Result;
use crate::history::review;
use std::path::Path;

pub fn run(workspace: &Path) -> Result<()> {
    let removed = review::cleanup(workspace)?;
    println!("Removed {removed} stale lock director{}.", if removed == 1 { "y" } else { "ies" });
    Ok(())
}
