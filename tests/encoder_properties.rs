//! Property tests for the feature encoder over arbitrary Telco records.

use churn_prediction_service::feature_encoder::{indicator_column, FeatureEncoder, FeatureSchema};
use churn_prediction_service::types::{ChurnLabel, CustomerRecord};
use proptest::prelude::*;

const CONTRACTS: &[&str] = &["Month-to-month", "One year", "Two year"];
const INTERNET: &[&str] = &["DSL", "Fiber optic", "No"];
const PAYMENT: &[&str] = &[
    "Electronic check",
    "Mailed check",
    "Bank transfer (automatic)",
    "Credit card (automatic)",
];

fn pick(options: &'static [&'static str]) -> impl Strategy<Value = &'static str> {
    (0..options.len()).prop_map(move |i| options[i])
}

prop_compose! {
    fn telco_record()(
        gender in pick(&["Male", "Female"]),
        partner in pick(&["Yes", "No"]),
        contract in pick(CONTRACTS),
        internet in pick(INTERNET),
        payment in pick(PAYMENT),
        tenure in 0u32..73,
        monthly in 18.0f64..120.0,
        total in 0.0f64..9000.0,
        drop_total in any::<bool>(),
    ) -> CustomerRecord {
        let record = CustomerRecord::new()
            .with("gender", gender)
            .with("Partner", partner)
            .with("Contract", contract)
            .with("InternetService", internet)
            .with("PaymentMethod", payment)
            .with("tenure", tenure)
            .with("MonthlyCharges", monthly);
        if drop_total {
            record
        } else {
            record.with("TotalCharges", total)
        }
    }
}

proptest! {
    #[test]
    fn output_columns_match_schema(record in telco_record()) {
        let schema = FeatureSchema::default();
        let vector = FeatureEncoder::new().encode(&record, &schema).unwrap();
        prop_assert_eq!(vector.names(), schema.names());
        prop_assert_eq!(vector.len(), schema.len());
    }

    #[test]
    fn one_hot_groups_are_exclusive(record in telco_record()) {
        let vector = FeatureEncoder::new()
            .encode(&record, &FeatureSchema::default())
            .unwrap();

        for (field, literals) in [("Contract", CONTRACTS), ("InternetService", INTERNET), ("PaymentMethod", PAYMENT)] {
            let hot: f32 = literals
                .iter()
                .map(|l| vector.get(&indicator_column(field, l)).unwrap())
                .sum();
            prop_assert_eq!(hot, 1.0);
        }
    }

    #[test]
    fn columns_outside_record_default_to_zero(record in telco_record()) {
        let schema = FeatureSchema::new(vec![
            "tenure".to_string(),
            "Unseen_column".to_string(),
            "TotalCharges".to_string(),
        ]).unwrap();
        let vector = FeatureEncoder::new().encode(&record, &schema).unwrap();

        prop_assert_eq!(vector.get("Unseen_column"), Some(0.0));
        if record.get("TotalCharges").is_none() {
            prop_assert_eq!(vector.get("TotalCharges"), Some(0.0));
        }
    }

    #[test]
    fn encoding_is_deterministic(record in telco_record()) {
        let schema = FeatureSchema::default();
        let encoder = FeatureEncoder::new();
        prop_assert_eq!(
            encoder.encode(&record, &schema).unwrap(),
            encoder.encode(&record, &schema).unwrap()
        );
    }

    #[test]
    fn valid_records_pass_strict_mode(record in telco_record()) {
        prop_assert!(FeatureEncoder::strict().encode(&record, &FeatureSchema::default()).is_ok());
    }

    #[test]
    fn label_is_monotonic_in_threshold(p in 0.0f64..=1.0, t1 in 0.0f64..=1.0, t2 in 0.0f64..=1.0) {
        let (low, high) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        let at_high = FeatureEncoder::decode(p, high).unwrap();
        let at_low = FeatureEncoder::decode(p, low).unwrap();
        if at_high.label == ChurnLabel::Churn {
            prop_assert_eq!(at_low.label, ChurnLabel::Churn);
        }
    }

    #[test]
    fn decoded_probability_stays_close(p in 0.0f64..=1.0, t in 0.0f64..=1.0) {
        let result = FeatureEncoder::decode(p, t).unwrap();
        prop_assert!((result.probability - p).abs() <= 0.0005 + 1e-12);
        prop_assert!((0.0..=1.0).contains(&result.probability));
        prop_assert_eq!(result.threshold, t);
    }

    #[test]
    fn out_of_range_probability_is_rejected(p in prop_oneof![-10.0f64..-0.001, 1.001f64..10.0]) {
        prop_assert!(FeatureEncoder::decode(p, 0.5).is_err());
    }
}
