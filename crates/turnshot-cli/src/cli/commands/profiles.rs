//! `turnshot profiles`: inspect the profile store and record the
//! active profile id.

use std::path::Path;

use anyhow::Result;
use turnshot_core::config::{self, ProfileStore};

use crate::cli::ProfilesAction;

pub fn run(home: &Path, action: &ProfilesAction) -> Result<()> {
    let mut store = ProfileStore::open(config::profiles_path(home))?;
    match action {
        ProfilesAction::List => {
            for profile in store.profiles() {
                let marker = if Some(profile.id.as_str()) == store.active_id() {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {:<16} {:<24} {}px @{}x",
                    profile.id, profile.name, profile.width_px, profile.scale
                );
            }
        }
        ProfilesAction::Use { id } => {
            store.set_active(id)?;
            println!("active profile: {id}");
        }
    }
    Ok(())
}
