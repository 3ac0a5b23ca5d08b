/// Unit tests for address extraction, the address value object and the task
/// status state machine.
use rust_geoleads_api::address_extractor::AddressExtractor;
use rust_geoleads_api::models::{address_was_enriched, AddressModel, TaskStatus};

fn empty_address() -> AddressModel {
    AddressModel {
        logradouro: String::new(),
        numero: String::new(),
        complemento: String::new(),
        bairro: String::new(),
        cidade: String::new(),
        estado: String::new(),
        cep: String::new(),
    }
}

#[cfg(test)]
mod extraction_tests {
    use super::*;

    #[test]
    fn test_absent_and_empty_input_yield_none() {
        let extractor = AddressExtractor::new();

        assert!(extractor.extract_from_html(None).is_none());
        assert!(extractor.extract_from_html(Some("")).is_none());
        assert!(extractor.extract_from_html(Some("   \n\t  ")).is_none());
    }

    #[test]
    fn test_no_address_content_yields_none() {
        let extractor = AddressExtractor::new();

        assert!(extractor
            .extract_from_html(Some("Bem-vindo à nossa loja de ferramentas!"))
            .is_none());
    }

    #[test]
    fn test_full_address_extraction() {
        let extractor = AddressExtractor::new();

        let html = r#"
            <div class="contato">
                Visite nossa loja: Rua Augusta, 1500 - Consolação,
                São Paulo - SP, CEP 01304-001
            </div>
        "#;

        let model = extractor.extract_from_html(Some(html)).unwrap();
        assert_eq!(model.logradouro, "Rua Augusta");
        assert_eq!(model.numero, "1500");
        assert_eq!(model.bairro, "Consolação");
        assert_eq!(model.cep, "01304-001");
        // Defaults for the collection area
        assert_eq!(model.cidade, "São Paulo");
        assert_eq!(model.estado, "SP");
    }

    #[test]
    fn test_cep_without_separator_is_normalized() {
        let extractor = AddressExtractor::new();

        let model = extractor
            .extract_from_html(Some("Entregas para o CEP 04038001 em até 2 dias"))
            .unwrap();
        assert_eq!(model.cep, "04038-001");
    }

    #[test]
    fn test_eleven_digit_phone_is_not_a_cep() {
        let extractor = AddressExtractor::new();

        assert!(extractor
            .extract_from_html(Some("Fale conosco: 11987654321"))
            .is_none());
    }

    #[test]
    fn test_number_after_keyword() {
        let extractor = AddressExtractor::new();

        let model = extractor
            .extract_from_html(Some("Alameda Santos - número: 2233, Jardim Paulista"))
            .unwrap();
        assert_eq!(model.logradouro, "Alameda Santos");
        assert_eq!(model.numero, "2233");
        assert_eq!(model.bairro, "Jardim Paulista");
    }

    #[test]
    fn test_neighborhood_only_still_extracts() {
        let extractor = AddressExtractor::new();

        let model = extractor
            .extract_from_html(Some("Atendemos toda a região de Pinheiros"))
            .unwrap();
        assert_eq!(model.bairro, "Pinheiros");
        assert!(model.logradouro.is_empty());
        assert!(model.is_valid());
    }

    #[test]
    fn test_day_numbered_street_name() {
        let extractor = AddressExtractor::new();

        let model = extractor
            .extract_from_html(Some("Banca na Rua 25 de Março, 100"))
            .unwrap();
        assert_eq!(model.logradouro, "Rua 25 de Março");
        assert_eq!(model.numero, "100");
    }

    #[test]
    fn test_address_beyond_scan_window_is_ignored() {
        let extractor = AddressExtractor::new();

        let mut html = "x".repeat(60_000);
        html.push_str("Rua Augusta, 1500, CEP 01304-001");

        assert!(extractor.extract_from_html(Some(&html)).is_none());
    }

    #[test]
    fn test_markup_is_stripped_before_matching() {
        let extractor = AddressExtractor::new();

        let model = extractor
            .extract_from_html(Some("<b>Avenida</b> <i>Paulista</i>, <span>900</span>"))
            .unwrap();
        assert_eq!(model.logradouro, "Avenida Paulista");
        assert_eq!(model.numero, "900");
    }
}

#[cfg(test)]
mod address_model_tests {
    use super::*;

    #[test]
    fn test_all_empty_model_is_invalid() {
        assert!(!empty_address().is_valid());
    }

    #[test]
    fn test_any_locating_field_makes_model_valid() {
        let mut with_street = empty_address();
        with_street.logradouro = "Rua Augusta".to_string();
        assert!(with_street.is_valid());

        let mut with_bairro = empty_address();
        with_bairro.bairro = "Moema".to_string();
        assert!(with_bairro.is_valid());

        let mut with_city = empty_address();
        with_city.cidade = "Campinas".to_string();
        assert!(with_city.is_valid());
    }

    #[test]
    fn test_default_carries_collection_area() {
        let model = AddressModel::default();
        assert_eq!(model.cidade, "São Paulo");
        assert_eq!(model.estado, "SP");
        assert!(model.is_valid());
    }

    #[test]
    fn test_filled_with_only_fills_empty_fields() {
        let mut original = empty_address();
        original.logradouro = "Rua Augusta".to_string();
        original.numero = "1500".to_string();
        original.cep = "01304-001".to_string();

        let mut lookup = empty_address();
        lookup.logradouro = "Rua Augusta (nome oficial)".to_string();
        lookup.bairro = "Consolação".to_string();
        lookup.cidade = "São Paulo".to_string();
        lookup.estado = "SP".to_string();

        let merged = original.filled_with(&lookup);

        // Present fields are preserved verbatim
        assert_eq!(merged.logradouro, "Rua Augusta");
        assert_eq!(merged.numero, "1500");
        assert_eq!(merged.cep, "01304-001");
        // Blank fields are filled
        assert_eq!(merged.bairro, "Consolação");
        assert_eq!(merged.cidade, "São Paulo");
        assert_eq!(merged.estado, "SP");
    }

    #[test]
    fn test_filled_with_never_takes_numero_or_complemento() {
        let original = empty_address();

        let mut lookup = empty_address();
        lookup.numero = "999".to_string();
        lookup.complemento = "fundos".to_string();

        let merged = original.filled_with(&lookup);
        assert!(merged.numero.is_empty());
        assert!(merged.complemento.is_empty());
    }

    #[test]
    fn test_city_only_drops_street_level_fields() {
        let mut full = empty_address();
        full.logradouro = "Rua Vergueiro".to_string();
        full.numero = "3185".to_string();
        full.bairro = "Vila Mariana".to_string();
        full.cidade = "São Paulo".to_string();
        full.estado = "SP".to_string();
        full.cep = "04101-300".to_string();

        let degraded = full.city_only();
        assert!(degraded.logradouro.is_empty());
        assert!(degraded.numero.is_empty());
        assert!(degraded.bairro.is_empty());
        assert!(degraded.cep.is_empty());
        assert_eq!(degraded.cidade, "São Paulo");
        assert_eq!(degraded.estado, "SP");
    }

    #[test]
    fn test_single_line_skips_empty_fields() {
        let mut model = empty_address();
        model.logradouro = "Rua Augusta".to_string();
        model.cidade = "São Paulo".to_string();

        assert_eq!(model.single_line(), "Rua Augusta, São Paulo");
    }

    #[test]
    fn test_cep_digits_strips_formatting() {
        let mut model = empty_address();
        model.cep = "01304-001".to_string();
        assert_eq!(model.cep_digits(), "01304001");
        assert!(model.has_cep());

        model.cep = "0130".to_string();
        assert!(!model.has_cep());
    }
}

#[cfg(test)]
mod enrichment_predicate_tests {
    use super::*;

    #[test]
    fn test_enriched_when_field_gained() {
        let original = empty_address();
        let mut enriched = empty_address();
        enriched.bairro = "Moema".to_string();

        assert!(address_was_enriched(&original, &enriched));
    }

    #[test]
    fn test_not_enriched_when_nothing_changed() {
        let mut original = empty_address();
        original.cidade = "São Paulo".to_string();

        assert!(!address_was_enriched(&original, &original.clone()));
    }

    #[test]
    fn test_changed_but_already_present_field_does_not_count() {
        let mut original = empty_address();
        original.cidade = "Sao Paolo".to_string(); // wrong but present

        let mut corrected = original.clone();
        corrected.cidade = "São Paulo".to_string();

        // Stated limitation: present-but-wrong fields are never "improved"
        assert!(!address_was_enriched(&original, &corrected));
    }

    #[test]
    fn test_numero_gain_does_not_count() {
        let original = empty_address();
        let mut with_number = empty_address();
        with_number.numero = "42".to_string();

        assert!(!address_was_enriched(&original, &with_number));
    }
}

#[cfg(test)]
mod task_status_tests {
    use super::*;

    #[test]
    fn test_pending_reaches_both_terminal_states() {
        assert!(TaskStatus::Pending.transition(TaskStatus::Done).is_ok());
        assert!(TaskStatus::Pending.transition(TaskStatus::Error).is_ok());
    }

    #[test]
    fn test_terminal_states_hold() {
        // ERROR never becomes DONE within a run
        assert!(TaskStatus::Error.transition(TaskStatus::Done).is_err());
        assert!(TaskStatus::Done.transition(TaskStatus::Error).is_err());
        assert!(TaskStatus::Done.transition(TaskStatus::Pending).is_err());
        assert!(TaskStatus::Error.transition(TaskStatus::Pending).is_err());
    }

    #[test]
    fn test_terminal_flags() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
    }
}
