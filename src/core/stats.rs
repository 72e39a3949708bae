use crate::domain::model::{parse_int, Stats};
use crate::utils::error::Result;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static STATS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[Stats\]\s+\((\S+)\)\s+(\S+)\s+(\S+)\s*(\S*)").expect("stats pattern is valid")
});

/// One `[Stats] (<component>) <metric> <value> [unit]` record.
#[derive(Debug, Clone, PartialEq)]
pub struct StatLine<'a> {
    pub component: &'a str,
    pub metric: &'a str,
    pub value: f64,
    pub unit: &'a str,
}

/// Parses one log line; anything that is not a stats record is `None`.
pub fn parse_line(line: &str) -> Option<StatLine<'_>> {
    let caps = STATS_LINE.captures(line)?;
    let component = caps.get(1)?.as_str();
    let metric = caps.get(2)?.as_str();
    let raw_value = caps.get(3)?.as_str();
    let unit = caps.get(4).map_or("", |m| m.as_str());

    let Some(value) = parse_number(raw_value) else {
        tracing::warn!(
            "Ignoring stats line for {}.{}: '{}' is not a number",
            component,
            metric,
            raw_value
        );
        return None;
    };

    Some(StatLine {
        component,
        metric,
        value,
        unit,
    })
}

fn parse_number(text: &str) -> Option<f64> {
    if let Some(v) = parse_int(text) {
        return Some(v as f64);
    }
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Folds every stats record of `log` into `stats`; later lines overwrite
/// earlier ones for the same component and metric.
pub fn parse_log(log: &str, stats: &mut Stats) -> usize {
    let mut matched = 0;
    for line in log.lines() {
        if let Some(record) = parse_line(line) {
            stats.insert(record.component, record.metric, record.value, record.unit);
            matched += 1;
        }
    }
    matched
}

/// Reads every `*.log` file directly inside `dir`, in directory order.
pub fn collect_stats(dir: &Path) -> Result<Stats> {
    let mut stats = Stats::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let bytes = std::fs::read(&path)?;
        let matched = parse_log(&String::from_utf8_lossy(&bytes), &mut stats);
        tracing::debug!("{}: {} stats records", path.display(), matched);
    }
    Ok(stats)
}

impl Stats {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `component,metric,value,unit` rows with a header.
    pub fn to_csv(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["component", "metric", "value", "unit"])?;
        for (component, metric, stat) in self.rows() {
            let value = stat.value.to_string();
            writer.write_record([component, metric, value.as_str(), stat.unit.as_str()])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Writes JSON or CSV depending on the file extension (JSON otherwise).
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let body = match path.extension().and_then(|e| e.to_str()) {
            Some("csv") => self.to_csv()?,
            _ => self.to_json()?,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, body)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_stats_line() {
        let record = parse_line("[Stats] (cpu0) executed_instructions 1000 instr").unwrap();
        assert_eq!(record.component, "cpu0");
        assert_eq!(record.metric, "executed_instructions");
        assert_eq!(record.value, 1000.0);
        assert_eq!(record.unit, "instr");
    }

    #[test]
    fn test_unit_is_optional() {
        let record = parse_line("[Stats] (l2) hit_ratio 0.75").unwrap();
        assert_eq!(record.value, 0.75);
        assert_eq!(record.unit, "");

        let record = parse_line("[Stats] (ram) base 0x100 B").unwrap();
        assert_eq!(record.value, 256.0);
    }

    #[test]
    fn test_non_matching_lines() {
        assert!(parse_line("(cpu0) executed_instructions 1000 instr").is_none());
        assert!(parse_line("Info: [Stats] (cpu0) x 1").is_none());
        assert!(parse_line("[Stats] (cpu0) cycles many").is_none());
        assert!(parse_line("").is_none());
    }

    #[test]
    fn test_parse_log_last_write_wins() {
        let mut stats = Stats::new();
        let log = "\
boot
[Stats] (cpu0) executed_instructions 1000 instr
[Stats] (cpu0) executed_instructions 1200 instr
[Stats] (bus) transactions 7
";
        assert_eq!(parse_log(log, &mut stats), 3);
        assert_eq!(stats.get("cpu0", "executed_instructions").unwrap().value, 1200.0);
        assert_eq!(stats.get("bus", "transactions").unwrap().unit, "");
    }

    #[test]
    fn test_collect_stats_reads_only_logs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("engine.log"),
            "[Stats] (cpu0) executed_instructions 1000 instr\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "[Stats] (cpu1) cycles 5\n").unwrap();

        let stats = collect_stats(dir.path()).unwrap();
        assert_eq!(stats.metric_count(), 1);
        let stat = stats.get("cpu0", "executed_instructions").unwrap();
        assert_eq!((stat.value, stat.unit.as_str()), (1000.0, "instr"));
    }

    #[test]
    fn test_exports() {
        let mut stats = Stats::new();
        stats.insert("cpu0", "cycles", 42.0, "cyc");

        let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(json["cpu0"]["cycles"]["value"], 42.0);
        assert_eq!(json["cpu0"]["cycles"]["unit"], "cyc");

        let csv = stats.to_csv().unwrap();
        assert_eq!(csv, "component,metric,value,unit\ncpu0,cycles,42,cyc\n");
    }
}
