use lms_feed::{records, DateResolver, RecordError, ScheduleError};

fn sample_feed() -> String {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
    std::fs::read_to_string(root.join("fixtures/sample-feed.txt")).expect("fixture feed")
}

#[test]
fn sample_feed_classifies_every_line() {
    let text = sample_feed();
    let resolver = DateResolver::new(chrono_tz::America::Los_Angeles);

    let mut valid = Vec::new();
    let mut malformed = Vec::new();
    let mut date_problems = Vec::new();

    for (line, parsed) in records(&text) {
        match parsed {
            Ok(record) => match resolver.resolve_schedule(&record) {
                Ok(_) => valid.push(record.uid),
                Err(err) => date_problems.push((line, err)),
            },
            Err(RecordError::FieldCount { found, .. }) => malformed.push((line, found)),
        }
    }

    assert_eq!(valid, vec!["UID100", "UID101", "UID102"]);
    assert_eq!(malformed, vec![(5, 5)]);
    assert_eq!(date_problems.len(), 2);
    assert_eq!(date_problems[0].0, 6);
    assert!(matches!(date_problems[0].1, ScheduleError::Date(_)));
    assert_eq!(date_problems[1], (7, ScheduleError::MissingStart));
}
