use serde_json::json;
use survey_harness::{parse, validate, AnswerStatus, QuestionDef, ReverseScorer, ScaleRange};

fn likert7() -> ScaleRange {
    ScaleRange::new(1, 7).unwrap()
}

#[test]
fn question_ranges_are_validated_on_deserialize() {
    let ok: QuestionDef = serde_json::from_value(json!({
        "scale_name": "NFC",
        "id": "nfc_1",
        "text": "I like puzzles.",
        "scale_range": [-4, 4]
    }))
    .unwrap();
    assert_eq!(ok.scale_range, validate(&json!([-4, 4])).unwrap());
    assert!(!ok.reverse_score);

    for bad in [json!([4, -4]), json!([1.0, 5]), json!("1-5")] {
        let err = serde_json::from_value::<QuestionDef>(json!({
            "scale_name": "NFC",
            "id": "nfc_1",
            "text": "I like puzzles.",
            "scale_range": bad
        }));
        assert!(err.is_err());
    }
}

#[test]
fn labeled_rating_anywhere_in_text() {
    let cases = [
        ("rating: 5 i mostly agree", "i mostly agree"),
        ("After some thought... Rating: 5. Tradition matters.", ". tradition matters."),
        ("My answer is rating: 5", "my answer is rating: 5"),
    ];
    for (text, justification) in cases {
        let answer = parse(text, likert7());
        assert_eq!(answer.numeric_score, 5.0, "{text}");
        assert_eq!(answer.justification, justification, "{text}");
        assert_eq!(answer.status, AnswerStatus::LabeledField);
    }
}

#[test]
fn text_without_numbers_yields_parser_warning() {
    for text in [
        "",
        "   ",
        "I'm not comfortable choosing a side on this.",
        "Strongly agree!",
    ] {
        let answer = parse(text, likert7());
        assert_eq!(answer.numeric_score, 4.0);
        assert!(answer.justification.starts_with("PARSER WARNING"));
        assert_eq!(answer.status, AnswerStatus::ParserWarning);
    }
}

#[test]
fn out_of_range_label_is_skipped_for_the_scan() {
    let answer = parse("score: 12, the answer is 4", likert7());
    assert_eq!(answer.numeric_score, 4.0);
    assert_eq!(answer.status, AnswerStatus::NumberScan);
}

#[test]
fn json_answer_inside_prose_is_found_by_scan() {
    // Not a whole-text object, so only the scan sees it.
    let answer = parse(r#"Here you go: {"rating": 6, "justification": "ok"}"#, likert7());
    assert_eq!(answer.numeric_score, 6.0);
    assert_eq!(answer.status, AnswerStatus::NumberScan);
}

#[test]
fn parsed_score_is_always_in_range() {
    let texts = [
        "rating: 0",
        "rating: 8",
        "-3",
        "100 percent. 2",
        r#"{"rating": 99}"#,
        "score: 3.75",
        "nothing",
    ];
    for scale in [ScaleRange::new(1, 5).unwrap(), likert7(), ScaleRange::new(-4, 4).unwrap()] {
        for text in texts {
            let answer = parse(text, scale);
            assert!(
                scale.contains(answer.numeric_score),
                "{text} on {scale} gave {}",
                answer.numeric_score
            );
        }
    }
}

#[test]
fn reverse_scoring_twice_is_identity() {
    let scorer = ReverseScorer::default();
    for scale in ["RWA", "LWA", "MFQ"] {
        for x in [1.0, 2.5, 4.0, 5.0] {
            let once = scorer.score(x, true, scale);
            assert_eq!(scorer.score(once, true, scale), x);
        }
    }
    assert_eq!(scorer.score(scorer.score(5.0, true, "RWA"), true, "RWA"), 5.0);
    assert_eq!(scorer.score(2.0, true, "RWA"), 6.0);
    assert_eq!(scorer.score(2.0, true, "MFQ"), 4.0);
}
