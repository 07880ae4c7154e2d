use crate::crosswalk::{CrosswalkEdge, CrosswalkTable};
use crate::error::{PipelineError, Result};
use crate::geo::{normalize_component, vintage_for_year, GeoId, GeoLevel};
use crate::pipeline::report::StageReport;
use crate::records::{
    CovariateRow, CrosswalkRow, LenderRecord, LoanRecord, LoanRow, PriceIndexRow, TractCovariates,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::warn;

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    Ok(csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?)
}

/// Read the loan file, canonicalizing each record's geography. Rows with a
/// malformed identifier or an unrecognized purpose value are rejected and
/// counted; a duplicate loan sequence id aborts the stage.
pub fn read_loans(path: &Path) -> Result<(Vec<LoanRecord>, StageReport)> {
    let mut rows_in = 0usize;
    let mut seen: HashSet<String> = HashSet::new();
    let mut loans = Vec::new();

    for result in reader(path)?.deserialize::<LoanRow>() {
        let row = result?;
        rows_in += 1;

        if !seen.insert(row.sequence_id.clone()) {
            return Err(PipelineError::DuplicateKey {
                table: "loans",
                key: row.sequence_id,
                count: 2,
            });
        }

        let geoid = match GeoId::tract(&row.state, &row.county, &row.tract) {
            Ok(geoid) => geoid,
            Err(e) => {
                warn!(sequence_id = %row.sequence_id, error = %e, "rejected loan row");
                continue;
            }
        };

        let refinance = match parse_purpose(row.purpose.as_deref()) {
            Ok(refinance) => refinance,
            Err(e) => {
                warn!(sequence_id = %row.sequence_id, error = %e, "rejected loan row");
                continue;
            }
        };

        loans.push(LoanRecord {
            sequence_id: row.sequence_id,
            year: row.year,
            vintage: vintage_for_year(row.year),
            geoid,
            amount: row.amount,
            income: row.income,
            lender_id: row.lender_id,
            refinance,
        });
    }

    let report = StageReport::new("ingest loans", rows_in, loans.len());
    report.log();
    Ok((loans, report))
}

fn parse_purpose(raw: Option<&str>) -> Result<Option<bool>> {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") => Ok(None),
        Some("refinance") | Some("refi") => Ok(Some(true)),
        Some("purchase") => Ok(Some(false)),
        Some(other) => Err(PipelineError::MalformedId(format!(
            "unrecognized loan purpose '{}'",
            other
        ))),
    }
}

/// Read the tract covariate table. The (GeoId, vintage) key must be unique;
/// a duplicate aborts the stage with the offending key.
pub fn read_covariates(path: &Path) -> Result<(Vec<TractCovariates>, StageReport)> {
    let mut rows_in = 0usize;
    let mut covariates: Vec<TractCovariates> = Vec::new();
    let mut seen: HashSet<(GeoId, u16)> = HashSet::new();

    for result in reader(path)?.deserialize::<CovariateRow>() {
        let row = result?;
        rows_in += 1;

        let geoid = match GeoId::tract(&row.state, &row.county, &row.tract) {
            Ok(geoid) => geoid,
            Err(e) => {
                warn!(error = %e, "rejected covariate row");
                continue;
            }
        };

        if !seen.insert((geoid.clone(), row.vintage)) {
            return Err(PipelineError::DuplicateKey {
                table: "covariates",
                key: format!("{} (vintage {})", geoid, row.vintage),
                count: 2,
            });
        }

        covariates.push(TractCovariates {
            geoid,
            vintage: row.vintage,
            values: crate::records::CovariateValues {
                median_income: row.median_income,
                vacant_units: row.vacant_units,
                housing_units: row.housing_units,
                population: row.population,
            },
        });
    }

    let report = StageReport::new("ingest covariates", rows_in, covariates.len());
    report.log();
    Ok((covariates, report))
}

/// Read the crosswalk correspondence table into edge form. Malformed rows
/// are rejected and counted like any other source row.
pub fn read_crosswalk(path: &Path) -> Result<(CrosswalkTable, StageReport)> {
    let mut rows_in = 0usize;
    let mut edges = Vec::new();

    for result in reader(path)?.deserialize::<CrosswalkRow>() {
        let row = result?;
        rows_in += 1;

        let parsed = GeoId::tract(&row.src_state, &row.src_county, &row.src_tract).and_then(
            |source| {
                GeoId::tract(&row.dst_state, &row.dst_county, &row.dst_tract)
                    .map(|target| (source, target))
            },
        );
        let (source, target) = match parsed {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "rejected crosswalk row");
                continue;
            }
        };

        edges.push(CrosswalkEdge {
            source,
            source_vintage: row.src_vintage,
            target,
            target_vintage: row.dst_vintage,
            weight: row.weight,
        });
    }

    let kept = edges.len();
    let report = StageReport::new("ingest crosswalk", rows_in, kept);
    report.log();
    Ok((CrosswalkTable::new(edges), report))
}

/// Read the lender list keyed by (lender id, year). Rows with an empty
/// lender id are rejected and counted; duplicates abort.
pub fn read_lenders(path: &Path) -> Result<(HashMap<(String, u16), LenderRecord>, StageReport)> {
    let mut rows_in = 0usize;
    let mut lenders = HashMap::new();

    for result in reader(path)?.deserialize::<LenderRecord>() {
        let row = result?;
        rows_in += 1;

        if row.lender_id.is_empty() {
            warn!(year = row.year, "rejected lender row with empty lender id");
            continue;
        }

        let key = (row.lender_id.clone(), row.year);
        if lenders.insert(key, row.clone()).is_some() {
            return Err(PipelineError::DuplicateKey {
                table: "lenders",
                key: format!("{} (year {})", row.lender_id, row.year),
                count: 2,
            });
        }
    }

    let report = StageReport::new("ingest lenders", rows_in, lenders.len());
    report.log();
    Ok((lenders, report))
}

/// Read the price-index table keyed by (state, year). Rows with a malformed
/// state component are rejected and counted; duplicates abort.
pub fn read_price_index(path: &Path) -> Result<(HashMap<(String, u16), f64>, StageReport)> {
    let mut rows_in = 0usize;
    let mut index = HashMap::new();

    for result in reader(path)?.deserialize::<PriceIndexRow>() {
        let row = result?;
        rows_in += 1;

        let state = match normalize_component(GeoLevel::State, &row.state) {
            Ok(state) => state,
            Err(e) => {
                warn!(year = row.year, error = %e, "rejected price-index row");
                continue;
            }
        };

        if index.insert((state.clone(), row.year), row.index).is_some() {
            return Err(PipelineError::DuplicateKey {
                table: "price_index",
                key: format!("{} (year {})", state, row.year),
                count: 2,
            });
        }
    }

    let report = StageReport::new("ingest price index", rows_in, index.len());
    report.log();
    Ok((index, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_loans_normalizes_and_counts_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "loans.csv",
            "sequence_id,year,state,county,tract,amount,income,lender_id,purpose\n\
             L1,1992,6,37,1234,120,45,B100,refinance\n\
             L2,1992,6,37,BADTRACT,80,30,B100,purchase\n\
             L3,1992,6,37,123.45,95,,B200,\n",
        );

        let (loans, report) = read_loans(&path).unwrap();
        assert_eq!(report.rows_in, 3);
        assert_eq!(report.rows_rejected, 1);
        assert_eq!(loans.len(), 2);

        assert_eq!(loans[0].geoid.as_str(), "06037123400");
        assert_eq!(loans[0].vintage, 1990);
        assert_eq!(loans[0].refinance, Some(true));

        assert_eq!(loans[1].geoid.as_str(), "06037012345");
        assert_eq!(loans[1].income, None);
        assert_eq!(loans[1].refinance, None);
    }

    #[test]
    fn test_duplicate_loan_sequence_id_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "loans.csv",
            "sequence_id,year,state,county,tract,amount,income,lender_id,purpose\n\
             L1,1992,6,37,1234,120,45,B100,refinance\n\
             L1,1992,6,37,1234,130,50,B100,purchase\n",
        );

        let err = read_loans(&path).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateKey { table: "loans", .. }));
    }

    #[test]
    fn test_duplicate_covariate_key_aborts_with_key_in_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "covariates.csv",
            "state,county,tract,vintage,median_income,vacant_units,housing_units,population\n\
             06,037,123456,2010,52,40,800,3000\n\
             6,37,1234.56,2010,53,41,810,3100\n",
        );

        let err = read_covariates(&path).unwrap_err();
        assert!(err.to_string().contains("06037123456"));
    }

    #[test]
    fn test_read_crosswalk_builds_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "crosswalk.csv",
            "src_state,src_county,src_tract,src_vintage,dst_state,dst_county,dst_tract,dst_vintage,weight\n\
             6,37,1234,1990,6,37,123401,2010,0.25\n\
             6,37,1234,1990,6,37,123402,2010,0.75\n",
        );

        let (table, report) = read_crosswalk(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(report.rows_rejected, 0);

        let mapping = table.resolve().unwrap();
        let src = GeoId::from_canonical("06037123400").unwrap();
        assert_eq!(
            mapping.target_for(&src, 1990, 2010).unwrap().as_str(),
            "06037123402"
        );
    }

    #[test]
    fn test_price_index_keeps_good_rows_past_a_malformed_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "hpi.csv",
            "state,year,index\nXX,1992,104.2\n06,1992,105.0\n",
        );

        let (index, report) = read_price_index(&path).unwrap();
        assert_eq!(report.rows_in, 2);
        assert_eq!(report.rows_rejected, 1);
        assert_eq!(index.get(&("06".to_string(), 1992)), Some(&105.0));
    }

    #[test]
    fn test_lenders_reject_empty_id_and_report_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "lenders.csv",
            "lender_id,year,name,agency\nB100,1992,First Bank,OCC\n,1992,Nameless,OCC\n",
        );

        let (lenders, report) = read_lenders(&path).unwrap();
        assert_eq!(report.rows_in, 2);
        assert_eq!(report.rows_rejected, 1);
        assert!(lenders.contains_key(&("B100".to_string(), 1992)));
    }

    #[test]
    fn test_price_index_normalizes_state_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "hpi.csv",
            "state,year,index\n6,1992,104.2\n06,1992,105.0\n",
        );

        let err = read_price_index(&path).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateKey { table: "price_index", .. }));
    }
}
