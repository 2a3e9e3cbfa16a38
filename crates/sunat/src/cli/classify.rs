//! `sunat classify`: show how file names map to document types

use crate::cli::output::{print_json, print_table};
use serde::Serialize;
use std::sync::Arc;
use sunat_ingest::{base_name, Classification, Classifier, PatternRegistry};

#[derive(Debug, Clone)]
pub struct ClassifyArgs {
    pub names: Vec<String>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ClassifiedName {
    file_name: String,
    #[serde(flatten)]
    classification: Classification,
}

pub fn run(args: ClassifyArgs) -> anyhow::Result<()> {
    let classifier = Classifier::new(Arc::new(PatternRegistry::sunat_default()?));
    let results = classify_all(&classifier, &args.names);

    if args.json {
        return print_json(&results);
    }

    let rows = results
        .iter()
        .map(|r| {
            let c = &r.classification;
            vec![
                r.file_name.clone(),
                c.doc_type().unwrap_or("-").to_string(),
                if !c.is_recognized() {
                    "-".to_string()
                } else if c.needs_transform {
                    "yes".to_string()
                } else {
                    "no".to_string()
                },
                c.fields
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(" "),
            ]
        })
        .collect();
    print_table(&["File", "Doc type", "Transform", "Fields"], rows);
    Ok(())
}

fn classify_all(classifier: &Classifier, names: &[String]) -> Vec<ClassifiedName> {
    names
        .iter()
        .map(|name| {
            let file_name = base_name(name).to_string();
            let classification = classifier.classify(&file_name);
            ClassifiedName {
                file_name,
                classification,
            }
        })
        .collect()
}
