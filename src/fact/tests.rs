use super::*;
use prost::Message;

/// A newer writer's schema: an extra payload kind and a trailing field.
#[derive(Clone, PartialEq, prost::Message)]
struct FutureFact {
    #[prost(message, optional, tag = "1")]
    pedigree: Option<Pedigree>,
    #[prost(message, optional, tag = "2")]
    dataunit: Option<FutureDataUnit>,
    #[prost(string, tag = "9")]
    origin: String,
}

#[derive(Clone, PartialEq, prost::Message)]
struct FutureDataUnit {
    #[prost(message, optional, tag = "2")]
    equiv: Option<UserId>,
}

fn sample() -> Fact {
    Fact::page_view("1.2.3.4", "http://a.com/x", 3600, 7)
}

#[test]
fn test_page_view_accessors() {
    let fact = sample();
    assert_eq!(fact.kind(), Some(FactKind::PageView));
    assert_eq!(fact.true_as_of(), Some(3600));
    assert_eq!(fact.page_url(), Some("http://a.com/x"));
    assert_eq!(fact.page_view_edge().map(|e| e.nonce), Some(7));
}

#[test]
fn test_with_page_url_replaces_only_url() {
    let fact = sample().with_page_url("http://a.com/y");
    assert_eq!(fact.page_url(), Some("http://a.com/y"));
    assert_eq!(fact.true_as_of(), Some(3600));
    assert_eq!(
        fact.page_view_edge()
            .and_then(|e| e.person.as_ref())
            .map(|p| p.user_id.as_str()),
        Some("1.2.3.4")
    );
}

#[test]
fn test_with_page_url_ignores_non_pageview() {
    let fact = Fact {
        pedigree: Some(Pedigree { true_as_of_secs: 1 }),
        dataunit: None,
    };
    assert_eq!(fact.clone().with_page_url("http://x"), fact);
}

#[test]
fn test_partition_names() {
    assert_eq!(FactKind::PageView.partition_name(), "page_view");
    assert_eq!(
        FactKind::from_partition_name("page_view"),
        Some(FactKind::PageView)
    );
    assert_eq!(FactKind::from_partition_name("equiv"), None);
}

#[test]
fn test_unknown_payload_kind_decodes_as_none() {
    let future = FutureFact {
        pedigree: Some(Pedigree {
            true_as_of_secs: 42,
        }),
        dataunit: Some(FutureDataUnit {
            equiv: Some(UserId {
                user_id: "u".to_string(),
            }),
        }),
        origin: "edge-7".to_string(),
    };

    let fact = Fact::decode(future.encode_to_vec().as_slice()).unwrap();
    assert_eq!(fact.true_as_of(), Some(42));
    assert_eq!(fact.kind(), None);
    assert!(fact.page_url().is_none());
}

#[test]
fn test_frame_decodes() {
    let buf = encode_record(&sample()).unwrap();
    let (result, consumed) = decode_record(&buf);
    assert_eq!(result.unwrap(), sample());
    assert_eq!(consumed, Some(buf.len()));
}

#[test]
fn test_checksum_mismatch_skips_only_that_frame() {
    let mut first = encode_record(&sample()).unwrap();
    let last = first.len() - 1;
    first[last] ^= 0xFF;
    let second = encode_record(&Fact::page_view("u", "http://b.com/", 0, 1)).unwrap();

    let mut buf = first;
    buf.extend_from_slice(&second);

    let results: Vec<_> = RecordIter::new(&buf).collect();
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0], Err(DecodeError::Checksum { .. })));
    assert_eq!(
        results[1].as_ref().unwrap().page_url(),
        Some("http://b.com/")
    );
}

#[test]
fn test_truncated_tail_ends_iteration() {
    let mut buf = encode_record(&sample()).unwrap();
    let partial = encode_record(&sample()).unwrap();
    buf.extend_from_slice(&partial[..partial.len() - 3]);

    let results: Vec<_> = RecordIter::new(&buf).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(DecodeError::Truncated { .. })));
}

#[test]
fn test_oversized_length_stops() {
    let mut buf = vec![0xFF, 0xFF, 0xFF, 0xFF, 0, 0, 0, 0];
    buf.extend_from_slice(&[0; 16]);
    let results: Vec<_> = RecordIter::new(&buf).collect();
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(DecodeError::Oversized(_))));
}

#[test]
fn test_nonce_sequence_is_monotonic() {
    let nonces = NonceSequence::starting_at(10);
    assert_eq!(nonces.next(), 10);
    assert_eq!(nonces.next(), 11);
    assert_eq!(NonceSequence::new().next(), 0);
}

#[test]
fn test_encode_refuses_oversized_body() {
    let huge = Fact::page_view("u", "x".repeat(MAX_RECORD_LEN + 1), 0, 0);
    assert!(matches!(
        encode_record(&huge),
        Err(EncodeError::TooLarge { max: MAX_RECORD_LEN, .. })
    ));
}
