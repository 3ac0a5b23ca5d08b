use crate::models::AddressModel;
use regex::Regex;

/// Scan window applied before any regex work. Source documents are often
/// hundreds of kilobytes of mostly irrelevant markup; addresses that matter
/// show up early.
const MAX_SCAN_LEN: usize = 50_000;

/// Known neighborhood names matched verbatim (case-insensitive) against the
/// scanned text. Lookup is name-based, not geometric.
const NEIGHBORHOOD_GAZETTEER: &[&str] = &[
    "Aclimação",
    "Alto de Pinheiros",
    "Bela Vista",
    "Brooklin",
    "Butantã",
    "Campo Belo",
    "Consolação",
    "Freguesia do Ó",
    "Higienópolis",
    "Ipiranga",
    "Itaim Bibi",
    "Jabaquara",
    "Jardim América",
    "Jardim Europa",
    "Jardim Paulista",
    "Jardins",
    "Lapa",
    "Liberdade",
    "Moema",
    "Mooca",
    "Morumbi",
    "Paraíso",
    "Perdizes",
    "Pinheiros",
    "Pompeia",
    "República",
    "Santa Cecília",
    "Santana",
    "Santo Amaro",
    "Saúde",
    "Tatuapé",
    "Tucuruvi",
    "Vila Leopoldina",
    "Vila Madalena",
    "Vila Mariana",
    "Vila Nova Conceição",
    "Vila Olímpia",
    "Vila Prudente",
];

/// Parses scraped text/markup into a structured address.
///
/// Extraction is layered: street type+name, house number, neighborhood
/// (gazetteer), CEP. Each layer is independent; the extractor returns a model
/// as soon as at least one layer matched, and `None` when none did.
#[derive(Clone)]
pub struct AddressExtractor {
    tag_re: Regex,
    street_re: Regex,
    trailing_numero_re: Regex,
    keyword_numero_re: Regex,
    cep_re: Regex,
}

impl Default for AddressExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressExtractor {
    pub fn new() -> Self {
        Self {
            tag_re: Regex::new(r"<[^>]*>").unwrap(),
            // Street type + name. Names may start with a day-style number
            // ("25 de Março"); otherwise digits end the name so the house
            // number can be captured separately.
            street_re: Regex::new(
                r"(?i)\b(rua|avenida|av|alameda|al|travessa|trav|pra[çc]a|estrada|rodovia|rod|largo|viela)\.?\s+((?:\d{1,2}\s+de\s+)?[A-Za-zÀ-ÖØ-öø-ÿ][A-Za-zÀ-ÖØ-öø-ÿ .'’]{1,58})",
            )
            .unwrap(),
            // Digits immediately after the street mention, optionally behind
            // a "nº"/"no." marker.
            trailing_numero_re: Regex::new(r"^\s*,?\s*(?:n[º°o]?\.?\s*)?(\d{1,6})\b").unwrap(),
            // Explicit "número: 123" anywhere in the text.
            keyword_numero_re: Regex::new(r"(?i)\bn[úu]mero\s*[:.]?\s*(\d{1,6})\b").unwrap(),
            cep_re: Regex::new(r"\b(\d{5})-?(\d{3})\b").unwrap(),
        }
    }

    /// Extracts an address from raw scraped text or markup.
    ///
    /// Never fails: absent, empty or malformed input yields `None`. Input is
    /// truncated to a bounded prefix before any scan.
    pub fn extract_from_html(&self, html: Option<&str>) -> Option<AddressModel> {
        let raw = html?;
        if raw.trim().is_empty() {
            return None;
        }

        let bounded = truncate_chars(raw, MAX_SCAN_LEN);
        let text = self.tag_re.replace_all(bounded, " ");

        let mut model = AddressModel::default();
        let mut matched = false;

        if let Some(caps) = self.street_re.captures(&text) {
            let street_type = canonical_street_type(&caps[1]);
            let name = caps[2]
                .trim()
                .trim_end_matches(['.', ',', '-', '\''])
                .trim();
            if !name.is_empty() {
                model.logradouro = format!("{} {}", street_type, name);
                matched = true;

                // House number: digits right after the street mention win
                // over a detached "número" keyword.
                let rest = &text[caps.get(0).map(|m| m.end()).unwrap_or(0)..];
                if let Some(num) = self.trailing_numero_re.captures(rest) {
                    model.numero = num[1].to_string();
                } else if let Some(num) = self.keyword_numero_re.captures(&text) {
                    model.numero = num[1].to_string();
                }
            }
        }

        if let Some(bairro) = self.find_neighborhood(&text) {
            model.bairro = bairro;
            matched = true;
        }

        if let Some(caps) = self.cep_re.captures(&text) {
            model.cep = format!("{}-{}", &caps[1], &caps[2]);
            matched = true;
        }

        if matched {
            Some(model)
        } else {
            None
        }
    }

    fn find_neighborhood(&self, text: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        NEIGHBORHOOD_GAZETTEER
            .iter()
            .filter_map(|name| {
                lowered
                    .find(&name.to_lowercase())
                    .map(|pos| (pos, name.to_string()))
            })
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, name)| name)
    }
}

/// Char-boundary-safe prefix truncation.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn canonical_street_type(raw: &str) -> &'static str {
    match raw.to_lowercase().as_str() {
        "rua" => "Rua",
        "avenida" | "av" => "Avenida",
        "alameda" | "al" => "Alameda",
        "travessa" | "trav" => "Travessa",
        "praça" | "praca" => "Praça",
        "estrada" => "Estrada",
        "rodovia" | "rod" => "Rodovia",
        "largo" => "Largo",
        "viela" => "Viela",
        _ => "Rua",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ção".repeat(10);
        let truncated = truncate_chars(&text, 5);
        assert_eq!(truncated.chars().count(), 5);
    }

    #[test]
    fn test_street_types_canonicalized() {
        let extractor = AddressExtractor::new();
        let model = extractor
            .extract_from_html(Some("Visite-nos na av Paulista, 1578"))
            .unwrap();
        assert_eq!(model.logradouro, "Avenida Paulista");
        assert_eq!(model.numero, "1578");
    }

    #[test]
    fn test_earliest_neighborhood_wins() {
        let extractor = AddressExtractor::new();
        let model = extractor
            .extract_from_html(Some("Loja em Moema e filial em Pinheiros"))
            .unwrap();
        assert_eq!(model.bairro, "Moema");
    }
}
