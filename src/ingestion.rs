use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::address::{SiteRecord, SiteTier};
use crate::batch::ResolvedDataset;
use crate::errors::AppResult;

/// Row layout of the site exports fed to the mapper. Header spellings vary
/// between study exports, hence the aliases.
#[derive(Debug, Deserialize)]
struct SiteRow {
    #[serde(rename = "Site Number", alias = "Site ID", alias = "site_id")]
    site_id: String,
    #[serde(rename = "Address", alias = "Street", default)]
    street: Option<String>,
    #[serde(rename = "Site City", alias = "City", default)]
    city: Option<String>,
    #[serde(
        rename = "State / Province",
        alias = "State/Province",
        alias = "State",
        default
    )]
    region: Option<String>,
    #[serde(rename = "Zip Code", alias = "Postal Code", default)]
    postal_code: Option<String>,
    #[serde(rename = "Country", default)]
    country: Option<String>,
    #[serde(rename = "Total Referrals", alias = "Referrals", default)]
    volume: Option<String>,
    #[serde(rename = "D&I Potential", alias = "Tier", default)]
    tier: Option<String>,
}

impl SiteRow {
    fn into_record(self) -> SiteRecord {
        let volume = match self.volume.as_deref().map(str::trim) {
            None | Some("") => 0.0,
            Some(raw) => raw.replace(',', "").parse::<f64>().unwrap_or_else(|_| {
                warn!(site_id = %self.site_id, raw, "unparseable volume; using 0");
                0.0
            }),
        };
        SiteRecord {
            site_id: self.site_id.trim().to_string(),
            street: self.street,
            city: self.city,
            region: self.region,
            postal_code: self.postal_code,
            country: self.country,
            volume,
            tier: self.tier.as_deref().map(SiteTier::parse).unwrap_or_default(),
        }
    }
}

pub fn read_site_records<R: Read>(reader: R) -> AppResult<Vec<SiteRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .flexible(true)
        .from_reader(reader);
    let mut records = Vec::new();
    for row in csv_reader.deserialize::<SiteRow>() {
        records.push(row?.into_record());
    }
    Ok(records)
}

#[derive(Debug, Serialize)]
struct ResolvedRow<'a> {
    site_id: &'a str,
    tier: &'a str,
    volume: f64,
    latitude: Option<f64>,
    longitude: Option<f64>,
    precision: Option<&'static str>,
}

pub fn write_resolved_rows<W: Write>(writer: W, dataset: &ResolvedDataset) -> AppResult<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for site in &dataset.sites {
        let coordinate = site.coordinate().coordinate();
        csv_writer.serialize(ResolvedRow {
            site_id: &site.record.site_id,
            tier: site.record.tier.label(),
            volume: site.record.volume,
            latitude: coordinate.map(|c| c.lat),
            longitude: coordinate.map(|c| c.lon),
            precision: site.resolution.precision.map(|variant| variant.as_tag()),
        })?;
    }
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::KeyVariant;
    use crate::batch::ResolvedSite;
    use crate::cache::{Coordinate, ResolvedCoordinate};
    use crate::fallback::{Resolution, ResolutionSource};

    const SITES_CSV: &str = "\
Site Number,Address,Site City,State / Province,Zip Code,Country,Total Referrals,D&I Potential
101,12 Main St,Springfield,IL,62701,US,\"1,204\",High Potential/High Enrolling
102,,Chicago,,,US,7,Low
103,1 Elm St,Peoria,IL,61602,US,n/a,
";

    #[test]
    fn reads_site_export_columns() {
        let records = read_site_records(SITES_CSV.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].volume, 1204.0);
        assert_eq!(records[0].tier, SiteTier::HighPotentialHighEnrolling);
        assert_eq!(records[1].street, None);
        assert_eq!(records[1].tier, SiteTier::Low);
        assert_eq!(records[2].volume, 0.0);
        assert_eq!(records[2].postal_code.as_deref(), Some("61602"));
    }

    #[test]
    fn accepts_alternate_headings() {
        let csv = "Site ID,City,State/Province,Country,Referrals\n9,Austin,TX,US,3\n";
        let records = read_site_records(csv.as_bytes()).unwrap();
        assert_eq!(records[0].site_id, "9");
        assert_eq!(records[0].region.as_deref(), Some("TX"));
        assert_eq!(records[0].volume, 3.0);
    }

    #[test]
    fn writes_empty_coordinates_for_unresolved_sites() {
        let dataset = ResolvedDataset {
            sites: vec![
                ResolvedSite {
                    record: SiteRecord::new("1").with_volume(5.0),
                    resolution: Resolution {
                        coordinate: ResolvedCoordinate::Resolved(Coordinate { lat: 39.8, lon: -89.6 }),
                        source: ResolutionSource::Degraded,
                        precision: Some(KeyVariant::Degraded),
                        external_calls: 2,
                    },
                },
                ResolvedSite {
                    record: SiteRecord::new("2"),
                    resolution: Resolution {
                        coordinate: ResolvedCoordinate::Unresolved,
                        source: ResolutionSource::Unresolved,
                        precision: None,
                        external_calls: 2,
                    },
                },
            ],
        };

        let mut out = Vec::new();
        write_resolved_rows(&mut out, &dataset).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "site_id,tier,volume,latitude,longitude,precision");
        assert_eq!(lines[1], "1,,5.0,39.8,-89.6,degraded");
        assert_eq!(lines[2], "2,,0.0,,,");
    }
}
