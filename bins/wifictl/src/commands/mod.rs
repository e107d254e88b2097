//! Subcommand implementations.

pub mod phy;
pub mod scan;

use std::io::{self, Write};

use serde::Serialize;
use wificond::netlink::NetlinkManager;
use wificond::nl80211::utils;

/// How results are printed.
pub struct Output {
    pub json: bool,
    pub pretty: bool,
}

impl Output {
    /// Print `value` as JSON, or call `text` to render it.
    pub fn emit<T, F>(&self, value: &T, text: F) -> anyhow::Result<()>
    where
        T: Serialize,
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let mut stdout = io::stdout().lock();
        if self.json {
            if self.pretty {
                serde_json::to_writer_pretty(&mut stdout, value)?;
            } else {
                serde_json::to_writer(&mut stdout, value)?;
            }
            writeln!(stdout)?;
        } else {
            text(&mut stdout)?;
        }
        Ok(())
    }
}

/// Use `ifindex` if given, otherwise the station interface of the first
/// wiphy.
pub fn resolve_ifindex(manager: &NetlinkManager, ifindex: Option<u32>) -> anyhow::Result<u32> {
    if let Some(ifindex) = ifindex {
        return Ok(ifindex);
    }
    let wiphy = utils::get_wiphy_index(manager)?;
    Ok(utils::get_interface_info(manager, wiphy)?.index)
}

/// Use `wiphy` if given, otherwise ask the kernel.
pub fn resolve_wiphy(manager: &NetlinkManager, wiphy: Option<u32>) -> anyhow::Result<u32> {
    match wiphy {
        Some(wiphy) => Ok(wiphy),
        None => Ok(utils::get_wiphy_index(manager)?),
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}
