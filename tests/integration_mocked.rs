/// Integration tests with mocked external collaborators
/// Exercises the ViaCEP, Nominatim and IBGE clients plus the enrichment and
/// geolocation chains without hitting real external services.
use rust_geoleads_api::cep_enrichment::AddressEnrichmentService;
use rust_geoleads_api::config::Config;
use rust_geoleads_api::geolocation::{GeolocationService, ReferencePoint};
use rust_geoleads_api::models::{address_was_enriched, AddressModel};
use rust_geoleads_api::services::{IbgeService, NominatimService, ViaCepService};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create test config pointing every collaborator at the
/// given base URL (tests usually need only one of them at a time).
fn create_test_config(base_url: &str) -> Config {
    Config {
        database_url: "postgresql://test".to_string(),
        port: 8080,
        reference_cep: "01310-100".to_string(),
        discovery_radius_km: 50.0,
        min_city_population: 50_000,
        discovery_fallback_top_cities: 10,
        viacep_base_url: base_url.to_string(),
        nominatim_base_url: base_url.to_string(),
        ibge_base_url: base_url.to_string(),
        notifier_url: None,
        request_delay_ms: 0,
    }
}

// ============ ViaCEP client ============

#[tokio::test]
async fn test_viacep_successful_lookup() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!({
        "cep": "01310-100",
        "logradouro": "Avenida Paulista",
        "complemento": "de 612 a 1510 - lado par",
        "bairro": "Bela Vista",
        "localidade": "São Paulo",
        "uf": "SP"
    });

    Mock::given(method("GET"))
        .and(path("/ws/01310100/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());

    let service = ViaCepService::new(&config);
    let result = service.lookup("01310-100").await;

    assert!(result.is_ok());
    let address = result.unwrap().expect("directory should know this CEP");
    assert_eq!(address.logradouro, "Avenida Paulista");
    assert_eq!(address.bairro, "Bela Vista");
    assert_eq!(address.localidade, "São Paulo");
    assert_eq!(address.uf, "SP");
}

#[tokio::test]
async fn test_viacep_unknown_cep_is_none() {
    let mock_server = MockServer::start().await;

    // ViaCEP answers unknown CEPs with 200 + {"erro": true}
    Mock::given(method("GET"))
        .and(path("/ws/99999999/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"erro": true})))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());

    let service = ViaCepService::new(&config);
    let result = service.lookup("99999-999").await;

    assert!(result.is_ok());
    assert!(result.unwrap().is_none());
}

#[tokio::test]
async fn test_viacep_server_error_is_remote_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());

    let service = ViaCepService::new(&config);
    let result = service.lookup("01310-100").await;

    assert!(result.is_err());
    assert!(result.unwrap_err().is_remote_unavailable());
}

#[tokio::test]
async fn test_viacep_malformed_cep_fails_with_zero_remote_calls() {
    let mock_server = MockServer::start().await;

    // No request may reach the directory for a malformed CEP
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());

    let service = ViaCepService::new(&config);
    let result = service.lookup("123").await;

    assert!(matches!(
        result,
        Err(rust_geoleads_api::errors::AppError::Validation(_))
    ));
}

// ============ Nominatim client ============

#[tokio::test]
async fn test_nominatim_successful_search() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!([
        {"lat": "-23.5613", "lon": "-46.6565", "display_name": "Avenida Paulista, São Paulo"}
    ]);

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("countrycodes", "br"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());

    let service = NominatimService::new(&config).unwrap();
    let result = service.search("Avenida Paulista, São Paulo, SP, Brasil").await;

    assert_eq!(result.unwrap(), Some((-23.5613, -46.6565)));
}

#[tokio::test]
async fn test_nominatim_no_match_is_none() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());

    let service = NominatimService::new(&config).unwrap();
    let result = service.search("Rua Inexistente 123").await;

    assert_eq!(result.unwrap(), None);
}

#[tokio::test]
async fn test_nominatim_circuit_opens_after_consecutive_failures() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let service = NominatimService::new(&config).unwrap();

    for _ in 0..5 {
        let result = service.search("Avenida Paulista").await;
        assert!(result.is_err());
    }

    // Circuit is now open: the next call is rejected before any request
    let rejected = service.search("Avenida Paulista").await;
    let err = rejected.unwrap_err();
    assert!(err.is_remote_unavailable());
    assert!(err.to_string().contains("circuit"));
}

// ============ IBGE client ============

#[tokio::test]
async fn test_ibge_municipality_list() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!([
        {"id": 3550308, "nome": "São Paulo"},
        {"id": 3509502, "nome": "Campinas"},
        {"id": 3518800, "nome": "Guarulhos"}
    ]);

    Mock::given(method("GET"))
        .and(path("/api/v1/localidades/estados/SP/municipios"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());

    let service = IbgeService::new(&config);
    let municipalities = service.municipalities("SP").await.unwrap();

    assert_eq!(municipalities.len(), 3);
    assert_eq!(municipalities[0].id, 3550308);
    assert_eq!(municipalities[0].nome, "São Paulo");
}

#[tokio::test]
async fn test_ibge_population_aggregate_parsing() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!([
        {
            "id": "6579",
            "resultados": [
                {
                    "series": [
                        {
                            "localidade": {"id": "3550308", "nome": "São Paulo"},
                            "serie": {"2024": "11451245"}
                        },
                        {
                            "localidade": {"id": "3509502", "nome": "Campinas"},
                            "serie": {"2024": "1139047"}
                        }
                    ]
                }
            ]
        }
    ]);

    Mock::given(method("GET"))
        .and(path("/api/v3/agregados/6579/periodos/-1/variaveis/9324"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());

    let service = IbgeService::new(&config);
    let populations = service.population_by_state(35).await.unwrap();

    assert_eq!(populations.get(&3550308), Some(&11_451_245));
    assert_eq!(populations.get(&3509502), Some(&1_139_047));
}

#[tokio::test]
async fn test_ibge_district_names() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!([
        {"id": 350950205, "nome": "Barão Geraldo"},
        {"id": 350950210, "nome": "Joaquim Egídio"},
        {"id": 350950215, "nome": "Sousas"}
    ]);

    Mock::given(method("GET"))
        .and(path("/api/v1/localidades/municipios/3509502/distritos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());

    let service = IbgeService::new(&config);
    let districts = service.districts(3509502).await.unwrap();

    assert_eq!(
        districts,
        vec!["Barão Geraldo", "Joaquim Egídio", "Sousas"]
    );
}

// ============ Enrichment chain ============

#[tokio::test]
async fn test_enrichment_fills_only_blank_fields() {
    let mock_server = MockServer::start().await;

    let mock_response = serde_json::json!({
        "cep": "01304-001",
        "logradouro": "Rua Augusta",
        "bairro": "Consolação",
        "localidade": "São Paulo",
        "uf": "SP"
    });

    Mock::given(method("GET"))
        .and(path("/ws/01304001/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&mock_response))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let service = AddressEnrichmentService::new(&config);

    let original = AddressModel {
        logradouro: String::new(),
        numero: "1500".to_string(),
        complemento: "loja 2".to_string(),
        bairro: String::new(),
        cidade: String::new(),
        estado: String::new(),
        cep: "01304-001".to_string(),
    };

    let enriched = service.try_enrich(&original).await.unwrap();

    assert_eq!(enriched.logradouro, "Rua Augusta");
    assert_eq!(enriched.bairro, "Consolação");
    assert_eq!(enriched.cidade, "São Paulo");
    assert_eq!(enriched.estado, "SP");
    // Scrape-observed ground truth untouched
    assert_eq!(enriched.numero, "1500");
    assert_eq!(enriched.complemento, "loja 2");

    assert!(address_was_enriched(&original, &enriched));
}

#[tokio::test]
async fn test_enrichment_without_cep_makes_zero_remote_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let service = AddressEnrichmentService::new(&config);

    let no_cep = AddressModel::default();
    let result = service.try_enrich(&no_cep).await;

    assert!(matches!(
        result,
        Err(rust_geoleads_api::errors::AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_enrichment_absorbs_directory_outage() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let service = AddressEnrichmentService::new(&config);

    let mut original = AddressModel::default();
    original.cep = "01304-001".to_string();

    let result = service.enrich_address_with_cep(&original).await;
    assert_eq!(result, original);
}

// ============ Geolocation chain ============

#[tokio::test]
async fn test_geocode_postal_code_chains_directory_and_geocoder() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ws/01310100/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "cep": "01310-100",
            "logradouro": "Avenida Paulista",
            "bairro": "Bela Vista",
            "localidade": "São Paulo",
            "uf": "SP"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"lat": "-23.5613", "lon": "-46.6565"}
        ])))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let service = GeolocationService::new(
        ViaCepService::new(&config),
        NominatimService::new(&config).unwrap(),
        ReferencePoint::fallback(),
        &config,
    );

    let coords = service.geocode_postal_code("01310-100").await.unwrap();
    assert_eq!(coords, Some((-23.5613, -46.6565)));
}

#[tokio::test]
async fn test_geocode_invalid_address_fails_fast() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let service = GeolocationService::new(
        ViaCepService::new(&config),
        NominatimService::new(&config).unwrap(),
        ReferencePoint::fallback(),
        &config,
    );

    let unusable = AddressModel {
        logradouro: String::new(),
        numero: String::new(),
        complemento: String::new(),
        bairro: String::new(),
        cidade: String::new(),
        estado: String::new(),
        cep: String::new(),
    };

    let result = service.geocode_address(&unusable).await;
    assert!(matches!(
        result,
        Err(rust_geoleads_api::errors::AppError::Validation(_))
    ));
}

#[tokio::test]
async fn test_reference_point_falls_back_on_outage() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let viacep = ViaCepService::new(&config);
    let nominatim = NominatimService::new(&config).unwrap();

    let reference = ReferencePoint::resolve(&viacep, &nominatim, "01310-100").await;

    assert!(reference.from_fallback);
    // São Paulo centroid
    assert!((reference.lat - (-23.5505)).abs() < 1e-9);
    assert!((reference.lon - (-46.6333)).abs() < 1e-9);
}

#[tokio::test]
async fn test_reference_point_resolves_through_chain() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ws/01310100/json/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "cep": "01310-100",
            "logradouro": "Avenida Paulista",
            "bairro": "Bela Vista",
            "localidade": "São Paulo",
            "uf": "SP"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"lat": "-23.5613", "lon": "-46.6565"}
        ])))
        .mount(&mock_server)
        .await;

    let config = create_test_config(&mock_server.uri());
    let viacep = ViaCepService::new(&config);
    let nominatim = NominatimService::new(&config).unwrap();

    let reference = ReferencePoint::resolve(&viacep, &nominatim, "01310-100").await;

    assert!(!reference.from_fallback);
    assert!((reference.lat - (-23.5613)).abs() < 1e-9);
    assert!((reference.lon - (-46.6565)).abs() < 1e-9);
}
