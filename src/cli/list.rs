use crate::cli::{GlobalOptions, local_updater};
use crate::core::candidate::CandidateMirror;
use crate::core::ranking::RankedMirrors;
use crate::Result;
use colored::Colorize;
use indicatif::{HumanBytes, HumanDuration};
use std::io::IsTerminal;
use std::time::Duration;

pub async fn execute(options: &GlobalOptions, url_char_len: Option<usize>) -> Result<()> {
    let config = options.load_config().await?;
    let url_char_len = url_char_len.unwrap_or(config.updater.url_char_len);
    let mut updater = local_updater(&config).await?;
    let ranked = updater.ranked_mirrors().await?;

    if std::io::stdout().is_terminal() {
        print_table(&ranked, url_char_len);
    } else {
        for mirror in usable_mirrors(&ranked) {
            println!("{}", mirror);
        }
    }
    Ok(())
}

/// Available mirrors that are not being updated, best first
fn usable_mirrors(ranked: &RankedMirrors) -> impl Iterator<Item = &str> {
    ranked
        .mirrors
        .iter()
        .filter(|m| m.is_available() && m.is_updating() != Some(true))
        .map(CandidateMirror::mirror_url)
}

fn print_table(ranked: &RankedMirrors, url_char_len: usize) {
    let table = MirrorTable::new(ranked, url_char_len);
    let widths = table.widths();
    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join("  ")
    };

    println!("{}", line(table.header.as_slice()).bold());
    println!("{}", "─".repeat(widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1)));
    for (row, mirror) in table.rows.iter().zip(&ranked.mirrors) {
        let text = line(row.as_slice());
        if !mirror.is_available() {
            println!("{}", text.dimmed());
        } else if mirror.is_updating() == Some(true) {
            println!("{}", text.yellow());
        } else {
            println!("{}", text);
        }
    }

    if !table.long_urls.is_empty() {
        println!("\nFull URLs which are too long to be shown in above table:");
        for (rank, url) in &table.long_urls {
            println!("{}: {}", rank, url);
        }
    }
}

/// Cells of the `list` table, before padding and coloring
struct MirrorTable {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    /// Rank and full URL of every truncated URL
    long_urls: Vec<(usize, String)>,
}

impl MirrorTable {
    fn new(ranked: &RankedMirrors, url_char_len: usize) -> Self {
        let have_last_updated = ranked.mirrors.iter().any(|m| m.last_updated().is_some());
        let have_bandwidth = ranked.mirrors.iter().any(|m| m.bandwidth() > 0.0);

        let mut header: Vec<String> = ["Rank", "Mirror URL", "Available?", "Updating?"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if have_last_updated {
            header.push("Last updated".to_string());
        }
        if have_bandwidth {
            header.push("Bandwidth".to_string());
        }

        let mut rows = Vec::with_capacity(ranked.len());
        let mut long_urls = Vec::new();
        for (idx, mirror) in ranked.mirrors.iter().enumerate() {
            let rank = idx + 1;
            let url = mirror.mirror_url();
            let shown = if url.chars().count() <= url_char_len {
                url.to_string()
            } else {
                long_urls.push((rank, url.to_string()));
                let kept: String = url.chars().take(url_char_len.saturating_sub(3)).collect();
                format!("{}...", kept)
            };

            let mut row = vec![
                rank.to_string(),
                shown,
                yes_no(mirror.is_available()),
                yes_no(mirror.is_updating() == Some(true)),
            ];
            if have_last_updated {
                row.push(match mirror.last_updated() {
                    Some(0) => "Up to date".to_string(),
                    Some(seconds) => format!("{} behind", HumanDuration(Duration::from_secs(seconds.unsigned_abs()))),
                    None => "Unknown".to_string(),
                });
            }
            if have_bandwidth {
                let bandwidth = mirror.bandwidth();
                row.push(if bandwidth > 0.0 {
                    format!("{}/s", HumanBytes(bandwidth as u64))
                } else {
                    "Unknown".to_string()
                });
            }
            rows.push(row);
        }

        Self {
            header,
            rows,
            long_urls,
        }
    }

    fn widths(&self) -> Vec<usize> {
        self.header
            .iter()
            .enumerate()
            .map(|(col, title)| {
                self.rows
                    .iter()
                    .filter_map(|row| row.get(col))
                    .map(|cell| cell.chars().count())
                    .chain(std::iter::once(title.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect()
    }
}

fn yes_no(value: bool) -> String {
    let text = if value { "Yes" } else { "No" };
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ranked() -> RankedMirrors {
        let mut fresh = CandidateMirror::new("http://mirror.example/ubuntu");
        fresh.record_release_probe(Some(Bytes::from("Date: x\n".repeat(250))), 0.4, "Date:");
        fresh.set_updating(false);
        fresh.set_last_updated(0);

        let mut updating = CandidateMirror::new("http://a-rather-long-mirror-host-name.example.org/ubuntu");
        updating.record_release_probe(Some(Bytes::from("Date: x\n")), 0.1, "Date:");
        updating.set_updating(true);
        updating.set_last_updated(3 * 3600 + 59);

        let gone = CandidateMirror::new("http://gone.example/ubuntu");

        RankedMirrors {
            mirrors: vec![fresh, updating, gone],
            all_updating: false,
        }
    }

    #[test]
    fn test_table_rows_and_truncated_urls() {
        let table = MirrorTable::new(&ranked(), 34);

        assert_eq!(
            table.header,
            vec!["Rank", "Mirror URL", "Available?", "Updating?", "Last updated", "Bandwidth"]
        );
        assert_eq!(
            table.rows[0],
            vec!["1", "http://mirror.example/ubuntu", "Yes", "No", "Up to date", "4.88 KiB/s"]
        );
        assert_eq!(table.rows[1][1], "http://a-rather-long-mirror-hos...");
        assert_eq!(table.rows[1][1].chars().count(), 34);
        assert_eq!(table.rows[1][3], "Yes");
        assert!(table.rows[1][4].ends_with("hours behind"), "{}", table.rows[1][4]);
        assert_eq!(table.rows[2][2..], ["No", "No", "Unknown", "Unknown"]);
        assert_eq!(
            table.long_urls,
            vec![(2, "http://a-rather-long-mirror-host-name.example.org/ubuntu".to_string())]
        );
    }

    #[test]
    fn test_plain_list_skips_unusable_mirrors() {
        let ranked = ranked();
        let urls: Vec<&str> = usable_mirrors(&ranked).collect();
        assert_eq!(urls, vec!["http://mirror.example/ubuntu"]);
    }
}
