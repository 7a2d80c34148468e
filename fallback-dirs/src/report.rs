//! Render a selection as a C fragment: source and summary comments, `#error` directives for hard
//! errors, then one string-list entry per fallback.
//!
//! ```text
//! /*
//! nickname
//! contact
//! Consensus Weight: 500 (50.000%)
//! Original Weight: 900 (90.000%)
//! */
//! "1.2.3.4:80 orport=9001 id=<fingerprint>"
//! " ipv6=[2001:db8::1]"
//! " weight=500",
//! ```

use std::fmt::{self, Display, Formatter};

use fallback_selection::{Config, Fallback, Selection};

use crate::escape::{c_multiline_comment, c_string};
use crate::source::FetchSource;

pub struct Report<'a> {
    pub sources: &'a [FetchSource],
    pub selection: &'a Selection<'a>,
    pub config: &'a Config,
}

fn percent(fraction: f64) -> String {
    format!("{:.3}%", fraction * 100.0)
}

impl Report<'_> {
    fn write_source(f: &mut Formatter<'_>, source: &FetchSource) -> fmt::Result {
        writeln!(f, "/*")?;
        writeln!(
            f,
            "Source: {} Date: {} Version: {}",
            c_multiline_comment(&source.what),
            c_multiline_comment(&source.relays_published),
            c_multiline_comment(&source.version)
        )?;
        writeln!(f, "Location: {}", c_multiline_comment(&source.location))?;
        writeln!(f, "*/")
    }

    fn write_summary(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let stats = &self.selection.stats;
        writeln!(f, "/*")?;
        writeln!(
            f,
            "Final Count: {} (Eligible {}, Max {})",
            stats.final_count, stats.eligible_count, stats.max_count
        )?;
        writeln!(
            f,
            "Final Weight: {:.0} (Eligible {:.0})",
            stats.total_weight, stats.eligible_weight
        )?;
        if let (Some(max), Some(min)) = (stats.max_weight, stats.min_weight) {
            writeln!(
                f,
                "Max Weight: {:.0} ({})",
                max.as_f64(),
                percent(stats.max_weight_fraction())
            )?;
            writeln!(
                f,
                "Min Weight: {:.0} ({})",
                min.as_f64(),
                percent(stats.min_weight_fraction())
            )?;
        }
        writeln!(
            f,
            "Reweighted: {} reduced, {} increased, {:.0} excess moved",
            stats.reweighting.reduced, stats.reweighting.increased, stats.reweighting.excess
        )?;
        writeln!(
            f,
            "Excluded: {} below {} ({:.0} weight)",
            stats.exclusion.count,
            percent(self.config.min_weight_fraction),
            stats.exclusion.weight
        )?;
        writeln!(f, "*/")?;
        for error in self.selection.hard_errors(self.config) {
            writeln!(f, "#error {error}")?;
        }
        Ok(())
    }

    fn write_fallback(&self, f: &mut Formatter<'_>, fallback: &Fallback) -> fmt::Result {
        let stats = &self.selection.stats;
        let relay = fallback.relay;
        let current = fallback.weight.current();
        writeln!(f, "/*")?;
        writeln!(f, "{}", c_multiline_comment(relay.nickname()))?;
        if let Some(contact) = relay.contact() {
            writeln!(f, "{}", c_multiline_comment(contact))?;
        }
        writeln!(
            f,
            "Consensus Weight: {:.0} ({})",
            current.as_f64(),
            percent(current.fraction_of(stats.total_weight))
        )?;
        if fallback.weight.is_adjusted() {
            let original = fallback.weight.original();
            writeln!(
                f,
                "Original Weight: {:.0} ({})",
                original.as_f64(),
                percent(original.fraction_of(stats.truncated_weight))
            )?;
        }
        writeln!(f, "*/")?;
        // Port numbers and weights are integers and need no escaping.
        writeln!(
            f,
            "\"{} orport={} id={}\"",
            c_string(relay.dir_address()),
            relay.or_port(),
            c_string(relay.fingerprint())
        )?;
        if let Some(ipv6) = relay.ipv6_address() {
            writeln!(f, "\" ipv6={}\"", c_string(ipv6))?;
        }
        writeln!(f, "\" weight={:.0}\",", current.as_f64())
    }
}

impl Display for Report<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for source in self.sources {
            Self::write_source(f, source)?;
        }
        self.write_summary(f)?;
        for fallback in &self.selection.fallbacks {
            self.write_fallback(f, fallback)?;
        }
        Ok(())
    }
}
