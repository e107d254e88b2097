//! wifictl scan / results / monitor.

use std::time::Duration;

use clap::Args;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use wificond::netlink::{NetlinkManager, NetlinkTransport};
use wificond::nl80211::{ScanNotification, ScanResult, scan};

use super::{Output, join, resolve_ifindex};

#[derive(Args)]
pub struct ScanCmd {
    /// Interface index (default: the station interface).
    #[arg(long)]
    ifindex: Option<u32>,

    /// SSID to probe for; repeat for more. Without any, a wildcard probe is sent.
    #[arg(long = "ssid")]
    ssids: Vec<String>,

    /// Frequency in MHz to scan; repeat for more. Default: all channels.
    #[arg(long = "freq")]
    freqs: Vec<u32>,

    /// Scan with a random source address.
    #[arg(long)]
    random_mac: bool,

    /// Wait for the scan to finish and print the results.
    #[arg(short = 'w', long)]
    wait: bool,

    /// How long to wait for the scan, in seconds.
    #[arg(long, default_value_t = 15)]
    wait_secs: u64,
}

impl ScanCmd {
    pub async fn run(&self, manager: &NetlinkManager, out: &Output) -> anyhow::Result<()> {
        let ifindex = resolve_ifindex(manager, self.ifindex)?;
        let ssids: Vec<Vec<u8>> = if self.ssids.is_empty() {
            vec![Vec::new()]
        } else {
            self.ssids.iter().map(|s| s.as_bytes().to_vec()).collect()
        };

        if !self.wait {
            scan::trigger_scan(manager, ifindex, &ssids, &self.freqs, self.random_mac)?;
            eprintln!("Scan started on ifindex {}", ifindex);
            return Ok(());
        }

        let notifications = subscribe(manager, ifindex);
        let outcome = self.trigger_and_wait(manager, ifindex, &ssids, notifications).await;
        manager.unsubscribe_scan_result_notification(ifindex);
        outcome?;

        print_results(out, &scan::get_scan_results(manager, ifindex)?)
    }

    async fn trigger_and_wait(
        &self,
        manager: &NetlinkManager,
        ifindex: u32,
        ssids: &[Vec<u8>],
        mut notifications: UnboundedReceiverStream<ScanNotification>,
    ) -> anyhow::Result<()> {
        scan::trigger_scan(manager, ifindex, ssids, &self.freqs, self.random_mac)?;
        let waited =
            tokio::time::timeout(Duration::from_secs(self.wait_secs), notifications.next()).await;
        match waited {
            Ok(Some(n)) if n.aborted => anyhow::bail!("scan aborted on ifindex {}", ifindex),
            Ok(Some(_)) => Ok(()),
            Ok(None) => anyhow::bail!("notification channel closed"),
            Err(_) => anyhow::bail!("no scan result after {}s", self.wait_secs),
        }
    }
}

#[derive(Args)]
pub struct ResultsCmd {
    /// Interface index (default: the station interface).
    #[arg(long)]
    ifindex: Option<u32>,
}

impl ResultsCmd {
    pub fn run(&self, manager: &NetlinkManager, out: &Output) -> anyhow::Result<()> {
        let ifindex = resolve_ifindex(manager, self.ifindex)?;
        print_results(out, &scan::get_scan_results(manager, ifindex)?)
    }
}

fn print_results(out: &Output, results: &[ScanResult]) -> anyhow::Result<()> {
    out.emit(&results, |w| {
        for bss in results {
            writeln!(w, "{}", bss)?;
        }
        Ok(())
    })
}

/// Route scan notifications for `ifindex` into a stream.
fn subscribe(
    manager: &NetlinkManager,
    ifindex: u32,
) -> UnboundedReceiverStream<ScanNotification> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.subscribe_scan_result_notification(
        ifindex,
        Box::new(move |n: &ScanNotification| {
            let _ = tx.send(n.clone());
        }),
    );
    UnboundedReceiverStream::new(rx)
}

#[derive(Args)]
pub struct MonitorCmd {
    /// Interface index (default: the station interface).
    #[arg(long)]
    ifindex: Option<u32>,

    /// Fetch and print the results after each completed scan.
    #[arg(short = 'r', long)]
    results: bool,
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum MonitorEvent<'a> {
    Scan(&'a ScanNotification),
    SchedScan { ifindex: u32 },
}

impl MonitorCmd {
    pub async fn run(&self, manager: &NetlinkManager, out: &Output) -> anyhow::Result<()> {
        let ifindex = resolve_ifindex(manager, self.ifindex)?;

        let mut scans = subscribe(manager, ifindex);
        let (tx, rx) = mpsc::unbounded_channel();
        manager.subscribe_sched_scan_result_notification(
            ifindex,
            Box::new(move |ifindex: u32| {
                let _ = tx.send(ifindex);
            }),
        );
        let mut sched_scans = UnboundedReceiverStream::new(rx);

        eprintln!("Monitoring scans on ifindex {} (Ctrl+C to stop)...", ifindex);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                Some(n) = scans.next() => {
                    out.emit(&MonitorEvent::Scan(&n), |w| {
                        let state = if n.aborted { "aborted" } else { "done" };
                        writeln!(w, "scan {} on ifindex {}", state, n.ifindex)?;
                        if !n.frequencies.is_empty() {
                            writeln!(w, "  freqs: {}", join(&n.frequencies))?;
                        }
                        for ssid in &n.ssids {
                            writeln!(w, "  ssid: \"{}\"", String::from_utf8_lossy(ssid))?;
                        }
                        Ok(())
                    })?;
                    if self.results && !n.aborted {
                        print_results(out, &scan::get_scan_results(manager, n.ifindex)?)?;
                    }
                }
                Some(ifindex) = sched_scans.next() => {
                    out.emit(&MonitorEvent::SchedScan { ifindex }, |w| {
                        writeln!(w, "scheduled scan results on ifindex {}", ifindex)
                    })?;
                }
            }
        }

        manager.unsubscribe_scan_result_notification(ifindex);
        manager.unsubscribe_sched_scan_result_notification(ifindex);
        Ok(())
    }
}
