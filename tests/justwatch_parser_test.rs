use chrono::NaiveDate;
use serde_json::json;

use streaming_catalog::apis::justwatch::{parse_title_details, parse_title_list};
use streaming_catalog::normalize::{RecordNormalizer, RecordShape};
use streaming_catalog::types::{Category, StreamKey};

#[test]
fn test_title_list_keeps_listing_order_and_skips_pathless_nodes() {
    let payload = json!({
        "data": {
            "popularTitles": {
                "edges": [
                    {"node": {"id": "tm1", "content": {"title": "Duna", "fullPath": "/br/filme/duna"}}},
                    {"node": {"id": "tm2", "content": {"title": "Sem caminho", "fullPath": null}}},
                    {"node": {"id": "tm3", "content": {"title": "Oppenheimer", "fullPath": "/br/filme/oppenheimer"}}}
                ]
            }
        }
    });

    let items = parse_title_list(&payload).unwrap();
    let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec!["/br/filme/duna", "/br/filme/oppenheimer"]);
    assert_eq!(items[0].id, "tm1");
}

#[test]
fn test_title_details_map_to_split_record() {
    let payload = json!({
        "data": {
            "urlV2": {
                "heading1": "Duna: Parte Dois",
                "node": {
                    "content": {
                        "originalReleaseYear": 2024,
                        "runtime": 166,
                        "shortDescription": "Paul Atreides se une a Chani e aos Fremen.",
                        "scoring": {"imdbScore": 8.5, "imdbVotes": 612345},
                        "ageCertification": "14"
                    }
                }
            }
        }
    });
    let stream = StreamKey::new("mxx", Category::Filmes);

    let raw = parse_title_details(&payload, &stream, "/br/filme/duna-parte-2").unwrap();
    assert_eq!(RecordShape::detect(&raw), RecordShape::SplitShaped);

    let captured = NaiveDate::from_ymd_opt(2025, 5, 20).unwrap().and_hms_opt(9, 0, 0).unwrap();
    let record = RecordNormalizer::new().normalize(&raw, RecordShape::SplitShaped, captured);

    assert_eq!(record.provedor.as_deref(), Some("mxx"));
    assert_eq!(record.categoria.as_deref(), Some("filmes"));
    assert_eq!(record.titulo.as_deref(), Some("Duna: Parte Dois"));
    assert_eq!(record.ano, Some(2024));
    assert_eq!(record.duracao_minutos, Some(166));
    assert_eq!(record.duracao.as_deref(), Some("2h 46min"));
    assert_eq!(record.imdb_score, Some(8.5));
    assert_eq!(record.imdb_count, Some(612_345));
    assert_eq!(record.classificacao.as_deref(), Some("14"));
    assert_eq!(
        record.url.as_deref(),
        Some("https://www.justwatch.com/br/filme/duna-parte-2")
    );
}

#[test]
fn test_title_details_with_missing_scoring_keeps_record() {
    let payload = json!({
        "data": {
            "urlV2": {
                "heading1": "Curta Independente",
                "node": {"content": {"originalReleaseYear": 2023, "runtime": null, "scoring": null}}
            }
        }
    });
    let stream = StreamKey::new("gop", Category::Series);

    let raw = parse_title_details(&payload, &stream, "/br/serie/curta").unwrap();
    let captured = NaiveDate::from_ymd_opt(2025, 5, 20).unwrap().and_hms_opt(9, 0, 0).unwrap();
    let outcome = RecordNormalizer::new().normalize_detailed(&raw, RecordShape::SplitShaped, captured);

    assert!(outcome.degraded_fields.is_empty());
    assert_eq!(outcome.record.titulo.as_deref(), Some("Curta Independente"));
    assert_eq!(outcome.record.imdb_score, None);
    assert_eq!(outcome.record.duracao, None);
    assert_eq!(outcome.record.ano, Some(2023));
}

#[test]
fn test_title_details_without_url_node_is_a_failure() {
    let stream = StreamKey::new("nfx", Category::Filmes);
    assert!(parse_title_details(&json!({"data": {"urlV2": null}}), &stream, "/br/filme/x").is_err());
    assert!(parse_title_details(
        &json!({"errors": [{"message": "not found"}]}),
        &stream,
        "/br/filme/x"
    )
    .is_err());
}
