//! export.rs — CSV export of recorded points

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;

use soil_types::{Channel, RecordedPoint};

/// Write one job's recorded points as CSV into `dir`, returning the path.
///
/// Layout: `name,crop,lat,lng,timestamp` followed by one column per probe
/// channel. The file name carries the job name (sanitized) and a local
/// timestamp so repeated exports never clobber each other.
pub async fn export_points_csv(
    dir: &Path,
    name: &str,
    crop: &str,
    points: &[RecordedPoint],
) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating export directory {}", dir.display()))?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("points_{}_{stamp}.csv", sanitize(name)));

    let mut out = String::from("name,crop,lat,lng,timestamp");
    for ch in Channel::ALL {
        out.push(',');
        out.push_str(ch.key());
    }
    out.push('\n');
    for p in points {
        out.push_str(&format!(
            "\"{}\",\"{}\",{:.8},{:.8},{}",
            escape(name),
            escape(crop),
            p.point.lat,
            p.point.lon,
            p.timestamp_ms
        ));
        for ch in Channel::ALL {
            let v = p.values.get(&ch).copied().unwrap_or(0.0);
            out.push_str(&format!(",{v:.2}"));
        }
        out.push('\n');
    }

    tokio::fs::write(&path, out)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), rows = points.len(), "exported recorded points");
    Ok(path)
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn escape(field: &str) -> String {
    field.replace('"', "\"\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use soil_types::GeoPoint;
    use std::collections::HashMap;

    fn point(ph: f64) -> RecordedPoint {
        let mut values = HashMap::new();
        for ch in Channel::ALL {
            values.insert(ch, 0.0);
        }
        values.insert(Channel::Ph, ph);
        RecordedPoint {
            point: GeoPoint::new(-26.1955, -52.6717),
            values,
            timestamp_ms: 1000,
        }
    }

    #[tokio::test]
    async fn writes_header_and_one_row_per_point() {
        let dir = std::env::temp_dir().join("fieldsense-export-test");
        let path = export_points_csv(&dir, "talhao 3", "soy", &[point(6.8), point(7.2)])
            .await
            .unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("name,crop,lat,lng,timestamp,humidity,"));
        assert!(lines[1].starts_with("\"talhao 3\",\"soy\",-26.19550000,-52.67170000,1000"));
        assert!(lines[1].contains(",6.80"));
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("points_talhao_3_"));
        tokio::fs::remove_file(path).await.unwrap();
    }

    #[test]
    fn sanitize_keeps_only_alphanumerics() {
        assert_eq!(sanitize("talhão 3/a"), "talh_o_3_a");
    }

    #[test]
    fn quotes_are_doubled() {
        assert_eq!(escape("a\"b"), "a\"\"b");
    }
}
