use nurture_core::{parse_bill_value, QualificationFlags};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Everything the extractor could read out of one debounced batch. The
/// tri-state fields distinguish "said yes", "said no", and "did not say";
/// the booleans are plain presence cues for reply selection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageCues {
    pub greeting: bool,
    pub stated_name: Option<String>,
    pub bill_value: Option<Decimal>,
    pub decision_maker: Option<bool>,
    pub existing_system: Option<bool>,
    pub wants_new_system: Option<bool>,
    pub competing_contract: Option<bool>,
    pub interest: Option<bool>,
    pub needs_described: bool,
    pub scheduling_request: bool,
    pub affirmation: bool,
    /// 0-based index into the offered time windows when the lead answered
    /// a numbered availability list.
    pub window_choice: Option<usize>,
}

/// Deterministic keyword extraction over inbound text. Understands the
/// mixed Portuguese/English phrasing the channel actually sees; diacritics
/// are folded before matching so "nao" and "não" read the same.
#[derive(Clone, Debug, Default)]
pub struct SignalExtractor;

impl SignalExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Reads one batch of inbound text. Callers join the batch in arrival
    /// order first so later messages can finish sentences started earlier.
    pub fn extract(&self, text: &str) -> MessageCues {
        let normalized = normalize_text(text);
        let tokens = tokenize(&normalized);

        let bill_value = extract_bill_value(&normalized, &tokens);
        let existing_system = detect_existing_system(&normalized, &tokens);
        let wants_new_system = detect_new_system_wish(&normalized, &tokens);
        let needs_described = bill_value.is_some()
            || existing_system.is_some()
            || wants_new_system.is_some()
            || NEED_PHRASES.iter().any(|cue| contains_phrase(&normalized, &tokens, cue));

        MessageCues {
            greeting: detect_greeting(&normalized, &tokens),
            stated_name: extract_stated_name(text),
            bill_value,
            decision_maker: detect_decision_maker(&normalized, &tokens),
            existing_system,
            wants_new_system,
            competing_contract: detect_competing_contract(&normalized, &tokens),
            interest: detect_interest(&normalized, &tokens),
            needs_described,
            scheduling_request: SCHEDULING_CUES
                .iter()
                .any(|cue| contains_phrase(&normalized, &tokens, cue)),
            affirmation: detect_affirmation(&normalized, &tokens),
            window_choice: detect_window_choice(&tokens),
        }
    }
}

/// Profile changes one batch taught us. `None` means the batch said
/// nothing about that field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactUpdates {
    pub display_name: Option<String>,
    pub bill_value: Option<Decimal>,
    pub is_decision_maker: Option<bool>,
    pub has_existing_system: Option<bool>,
    pub wants_new_system: Option<bool>,
    pub has_active_competing_contract: Option<bool>,
    pub explicit_interest: Option<bool>,
}

impl FactUpdates {
    pub fn from_cues(cues: &MessageCues) -> Self {
        Self {
            display_name: cues.stated_name.clone(),
            bill_value: cues.bill_value,
            is_decision_maker: cues.decision_maker,
            has_existing_system: cues.existing_system,
            wants_new_system: cues.wants_new_system,
            has_active_competing_contract: cues.competing_contract,
            explicit_interest: cues.interest,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.bill_value.is_none()
            && self.is_decision_maker.is_none()
            && self.has_existing_system.is_none()
            && self.wants_new_system.is_none()
            && self.has_active_competing_contract.is_none()
            && self.explicit_interest.is_none()
    }

    /// Writes every answered field over `flags`. `None` fields leave the
    /// stored answer untouched, so a batch that is silent on a question
    /// never erases an earlier answer.
    pub fn apply_to(&self, flags: &mut QualificationFlags) {
        if let Some(value) = self.bill_value {
            flags.bill_value = Some(value);
        }
        if let Some(value) = self.is_decision_maker {
            flags.is_decision_maker = Some(value);
        }
        if let Some(value) = self.has_existing_system {
            flags.has_existing_system = Some(value);
        }
        if let Some(value) = self.wants_new_system {
            flags.wants_new_system = Some(value);
        }
        if let Some(value) = self.has_active_competing_contract {
            flags.has_active_competing_contract = Some(value);
        }
        if let Some(value) = self.explicit_interest {
            flags.explicit_interest = Some(value);
        }
    }
}

const GREETINGS: [&str; 12] = [
    "oi",
    "ola",
    "hi",
    "hello",
    "hey",
    "bom dia",
    "boa tarde",
    "boa noite",
    "good morning",
    "good afternoon",
    "good evening",
    "tudo bem",
];

const NAME_MARKERS: [&[&str]; 8] = [
    &["meu", "nome", "e"],
    &["meu", "nome", "eh"],
    &["me", "chamo"],
    &["sou", "o"],
    &["sou", "a"],
    &["sou"],
    &["my", "name", "is"],
    &["this", "is"],
];

const BILL_CONTEXT: [&str; 17] = [
    "conta", "fatura", "bill", "luz", "energia", "pago", "pagamos", "pay", "paying", "gasto",
    "gastamos", "spend", "mensal", "monthly", "reais", "mes", "month",
];

const DECISION_YES: [&str; 16] = [
    "sou o dono",
    "sou a dona",
    "sou o proprietario",
    "sou a proprietaria",
    "sou o responsavel",
    "sou a responsavel",
    "eu decido",
    "eu que decido",
    "a decisao e minha",
    "i am the owner",
    "i'm the owner",
    "im the owner",
    "i am the decision maker",
    "i'm the decision maker",
    "i make the decisions",
    "it's my decision",
];

const DECISION_NO: [&str; 13] = [
    "nao sou o dono",
    "nao sou a dona",
    "nao sou eu que decido",
    "nao decido",
    "preciso falar com",
    "tenho que perguntar",
    "tenho que falar com",
    "quem decide e",
    "not my decision",
    "i am not the owner",
    "i'm not the owner",
    "have to ask",
    "need to check with",
];

const EXISTING_YES: [&str; 14] = [
    "ja tenho sistema",
    "ja temos sistema",
    "ja tenho placas",
    "ja temos placas",
    "ja tem sistema",
    "sistema instalado",
    "placas instaladas",
    "ja instalei",
    "ja instalamos",
    "tenho um sistema",
    "temos um sistema",
    "already have a system",
    "already installed",
    "system installed",
];

const EXISTING_NO: [&str; 10] = [
    "nao tenho sistema",
    "nao temos sistema",
    "nao tenho placas",
    "nao temos placas",
    "nada instalado",
    "nao tenho nada",
    "no system yet",
    "don't have a system",
    "dont have a system",
    "nothing installed",
];

const NEW_SYSTEM_YES: [&str; 15] = [
    "quero trocar",
    "queremos trocar",
    "quero substituir",
    "quero atualizar",
    "quero expandir",
    "quero aumentar",
    "trocar o sistema",
    "substituir o sistema",
    "quero um sistema novo",
    "quero um novo sistema",
    "want a new system",
    "want to replace",
    "want to upgrade",
    "replace the system",
    "upgrade the system",
];

const NEW_SYSTEM_NO: [&str; 9] = [
    "nao quero trocar",
    "nao pretendo trocar",
    "estou satisfeito com o sistema",
    "estou satisfeita com o sistema",
    "manter o atual",
    "vou manter o que tenho",
    "happy with my current",
    "keep my current",
    "not looking to replace",
];

const CONTRACT_YES: [&str; 13] = [
    "tenho contrato",
    "temos contrato",
    "contrato de fidelidade",
    "fidelidade com",
    "ainda no contrato",
    "contrato vigente",
    "fechei com outra",
    "fechamos com outra",
    "assinei com",
    "under contract",
    "signed a contract",
    "signed with another",
    "still in a contract",
];

const CONTRACT_NO: [&str; 12] = [
    "nao tenho contrato",
    "nao temos contrato",
    "sem contrato",
    "sem fidelidade",
    "contrato acabou",
    "contrato terminou",
    "contrato venceu",
    "acabou o contrato",
    "no contract",
    "contract ended",
    "contract expired",
    "out of contract",
];

const INTEREST_NO: [&str; 19] = [
    "nao tenho interesse",
    "sem interesse",
    "nao me interessa",
    "nao estou interessado",
    "nao estou interessada",
    "nao quero mais",
    "nao quero nada",
    "pare de mandar",
    "para de mandar",
    "me tira da lista",
    "nao mande mais",
    "not interested",
    "no interest",
    "stop messaging",
    "stop texting",
    "remove me from",
    "don't contact me",
    "dont contact me",
    "leave me alone",
];

const INTEREST_YES: [&str; 18] = [
    "tenho interesse",
    "me interessa",
    "quero sim",
    "quero saber mais",
    "quero entender",
    "quero conhecer",
    "gostaria de saber",
    "gostaria de entender",
    "parece bom",
    "parece otimo",
    "muito interessante",
    "interessado",
    "interessada",
    "interested",
    "sounds interesting",
    "sounds great",
    "tell me more",
    "i want to know more",
];

const SCHEDULING_CUES: [&str; 18] = [
    "agendar",
    "agendamos",
    "marcar",
    "marcamos",
    "reuniao",
    "visita",
    "horario",
    "agenda",
    "schedule",
    "meeting",
    "appointment",
    "vamos marcar",
    "pode agendar",
    "quando podemos",
    "book a time",
    "set up a call",
    "let's talk",
    "lets talk",
];

const AFFIRMATION_WORDS: [&str; 16] = [
    "sim", "claro", "ok", "okay", "yes", "sure", "perfeito", "fechado", "combinado", "confirmo",
    "bora", "beleza", "show", "top", "otimo", "certo",
];

const AFFIRMATION_PHRASES: [&str; 9] = [
    "pode ser",
    "por mim tudo certo",
    "esta otimo",
    "esta bom",
    "fica bom",
    "fica otimo",
    "works for me",
    "sounds good",
    "that works",
];

const NEGATORS: [&str; 5] = ["nao", "no", "not", "nem", "nunca"];

const NEED_PHRASES: [&str; 18] = [
    "conta de luz",
    "conta esta alta",
    "conta muito alta",
    "conta alta",
    "quero economizar",
    "economizar na conta",
    "reduzir a conta",
    "diminuir a conta",
    "energia solar",
    "placas solares",
    "painel solar",
    "paineis solares",
    "energy bill",
    "lower my bill",
    "save on energy",
    "cut my bill",
    "kwh",
    "consumo",
];

fn normalize_text(text: &str) -> String {
    text.to_lowercase().chars().map(fold_diacritic).collect()
}

fn fold_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' => 'a',
        'é' | 'ê' => 'e',
        'í' => 'i',
        'ó' | 'ô' | 'õ' => 'o',
        'ú' | 'ü' => 'u',
        'ç' => 'c',
        _ => c,
    }
}

/// Separators stay inside tokens so "1.200,50" survives as one money
/// token, but get trimmed off the edges so "luz." still equals "luz".
fn tokenize(normalized_text: &str) -> Vec<String> {
    let sanitized: String = normalized_text
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '$' | '.' | ',') { c } else { ' ' })
        .collect();
    sanitized
        .split_whitespace()
        .map(|token| token.trim_matches(|c| matches!(c, '.' | ',')).to_string())
        .filter(|token| !token.is_empty())
        .collect()
}

/// Single words match whole tokens; anything with a space matches as a
/// substring of the normalized text. Keeps two-letter cues like "oi" from
/// firing inside longer words.
fn contains_phrase(normalized: &str, tokens: &[String], phrase: &str) -> bool {
    if phrase.contains(' ') {
        normalized.contains(phrase)
    } else {
        tokens.iter().any(|token| token == phrase)
    }
}

fn detect_greeting(normalized: &str, tokens: &[String]) -> bool {
    GREETINGS.iter().any(|cue| contains_phrase(normalized, tokens, cue))
}

/// Looks for a self-introduction marker and takes up to two following
/// words, but only while they are capitalized in the raw text. "i am
/// interested" therefore never yields a name.
fn extract_stated_name(raw: &str) -> Option<String> {
    let words: Vec<&str> = raw.split_whitespace().collect();
    let folded: Vec<String> = words
        .iter()
        .map(|word| normalize_text(word).chars().filter(|c| c.is_alphanumeric()).collect())
        .collect();

    for marker in NAME_MARKERS {
        let Some(position) = marker_end(&folded, marker) else { continue };
        let candidates: Vec<&str> = words[position..]
            .iter()
            .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()))
            .take_while(|word| is_name_word(word))
            .take(2)
            .collect();
        if !candidates.is_empty() {
            return Some(candidates.join(" "));
        }
    }
    None
}

fn marker_end(folded_words: &[String], marker: &[&str]) -> Option<usize> {
    folded_words
        .windows(marker.len())
        .position(|window| window.iter().zip(marker).all(|(word, expected)| word == expected))
        .map(|start| start + marker.len())
}

fn is_name_word(word: &str) -> bool {
    let mut chars = word.chars();
    chars.next().is_some_and(char::is_uppercase) && word.chars().all(char::is_alphabetic)
}

/// Currency-marked amounts ("R$ 600") are read anywhere; bare numbers only
/// count when the batch talks about the bill, so "tenho 3 filhos" does not
/// become a monthly amount.
fn extract_bill_value(normalized: &str, tokens: &[String]) -> Option<Decimal> {
    for (index, token) in tokens.iter().enumerate() {
        let Some(stripped) = token.strip_prefix("r$").or_else(|| token.strip_prefix('$')) else {
            continue;
        };
        if stripped.is_empty() {
            if let Some(value) = tokens.get(index + 1).and_then(|next| parse_bill_value(next)) {
                return Some(value);
            }
        } else if let Some(value) = parse_bill_value(stripped) {
            return Some(value);
        }
    }

    if !BILL_CONTEXT.iter().any(|cue| contains_phrase(normalized, tokens, cue)) {
        return None;
    }
    tokens
        .iter()
        .filter(|token| token.chars().next().is_some_and(|c| c.is_ascii_digit()))
        .find_map(|token| parse_bill_value(token))
}

fn detect_decision_maker(normalized: &str, tokens: &[String]) -> Option<bool> {
    detect_tri_state(normalized, tokens, &DECISION_NO, &DECISION_YES)
}

fn detect_existing_system(normalized: &str, tokens: &[String]) -> Option<bool> {
    detect_tri_state(normalized, tokens, &EXISTING_NO, &EXISTING_YES)
}

fn detect_new_system_wish(normalized: &str, tokens: &[String]) -> Option<bool> {
    detect_tri_state(normalized, tokens, &NEW_SYSTEM_NO, &NEW_SYSTEM_YES)
}

fn detect_competing_contract(normalized: &str, tokens: &[String]) -> Option<bool> {
    detect_tri_state(normalized, tokens, &CONTRACT_NO, &CONTRACT_YES)
}

fn detect_interest(normalized: &str, tokens: &[String]) -> Option<bool> {
    detect_tri_state(normalized, tokens, &INTEREST_NO, &INTEREST_YES)
}

/// Negated phrases are checked first because most of them contain their
/// positive counterpart ("nao tenho contrato" contains "tenho contrato").
fn detect_tri_state(
    normalized: &str,
    tokens: &[String],
    negative: &[&str],
    positive: &[&str],
) -> Option<bool> {
    if negative.iter().any(|cue| contains_phrase(normalized, tokens, cue)) {
        return Some(false);
    }
    if positive.iter().any(|cue| contains_phrase(normalized, tokens, cue)) {
        return Some(true);
    }
    None
}

/// Any negator in the batch vetoes the cue; "nao pode ser" must not read
/// as agreement just because it contains "pode ser".
fn detect_affirmation(normalized: &str, tokens: &[String]) -> bool {
    if tokens.iter().any(|token| NEGATORS.contains(&token.as_str())) {
        return false;
    }
    AFFIRMATION_WORDS.iter().any(|word| contains_phrase(normalized, tokens, word))
        || AFFIRMATION_PHRASES.iter().any(|phrase| contains_phrase(normalized, tokens, phrase))
}

fn detect_window_choice(tokens: &[String]) -> Option<usize> {
    tokens.iter().find_map(|token| match token.as_str() {
        "1" => Some(0),
        "2" => Some(1),
        "3" => Some(2),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use nurture_core::QualificationFlags;

    use super::{FactUpdates, MessageCues, SignalExtractor};

    fn extract(text: &str) -> MessageCues {
        SignalExtractor::new().extract(text)
    }

    #[test]
    fn greets_in_both_languages() {
        assert!(extract("oi, tudo bem?").greeting);
        assert!(extract("Bom dia!").greeting);
        assert!(extract("Hey there").greeting);
        assert!(!extract("quero saber o preço").greeting);
    }

    #[test]
    fn extracts_a_stated_name_and_keeps_its_casing() {
        assert_eq!(extract("oi, meu nome é João Pedro").stated_name.as_deref(), Some("João Pedro"));
        assert_eq!(extract("Me chamo Marina.").stated_name.as_deref(), Some("Marina"));
        assert_eq!(extract("sou a Ana, tudo bem?").stated_name.as_deref(), Some("Ana"));
        assert_eq!(extract("Hi, my name is Carlos").stated_name.as_deref(), Some("Carlos"));
    }

    #[test]
    fn lowercase_words_after_a_marker_are_not_names() {
        assert_eq!(extract("i am interested in solar").stated_name, None);
        assert_eq!(extract("sou o responsável pela compra").stated_name, None);
        assert_eq!(extract("meu nome é").stated_name, None);
    }

    #[test]
    fn reads_bill_amounts_with_currency_or_context() {
        assert_eq!(extract("minha conta vem uns 600 por mês").bill_value, Some(Decimal::from(600)));
        assert_eq!(
            extract("pago R$ 1.200,50 de luz").bill_value,
            Some(Decimal::new(120_050, 2))
        );
        assert_eq!(extract("R$350").bill_value, Some(Decimal::from(350)));
        assert_eq!(extract("tenho 3 filhos").bill_value, None);
    }

    #[test]
    fn an_unreadable_bill_stays_unknown() {
        assert_eq!(extract("minha conta é um absurdo").bill_value, None);
        assert_eq!(extract("a fatura veio cara demais").bill_value, None);
    }

    #[test]
    fn negated_phrases_win_over_their_positive_substrings() {
        assert_eq!(extract("não sou o dono, preciso falar com ele").decision_maker, Some(false));
        assert_eq!(extract("sou o dono da casa").decision_maker, Some(true));
        assert_eq!(extract("não tenho contrato com ninguém").competing_contract, Some(false));
        assert_eq!(extract("tenho contrato de fidelidade").competing_contract, Some(true));
        assert_eq!(extract("não tenho sistema nenhum").existing_system, Some(false));
    }

    #[test]
    fn replacement_answers_are_separate_from_disinterest() {
        let cues = extract("não quero trocar o sistema que tenho");
        assert_eq!(cues.wants_new_system, Some(false));
        assert_eq!(cues.interest, None);
    }

    #[test]
    fn detects_disinterest_before_interest() {
        let cues = extract("não estou interessado, me tira da lista");
        assert_eq!(cues.interest, Some(false));
        assert_eq!(extract("tenho interesse sim!").interest, Some(true));
    }

    #[test]
    fn scheduling_words_set_the_request_cue() {
        assert!(extract("podemos marcar uma visita?").scheduling_request);
        assert!(extract("quero agendar").scheduling_request);
        assert!(extract("can we book a time tomorrow?").scheduling_request);
        assert!(!extract("minha conta é 600").scheduling_request);
    }

    #[test]
    fn a_bare_option_number_is_a_window_pick() {
        let cues = extract("pode ser a 2");
        assert_eq!(cues.window_choice, Some(1));
        assert!(cues.affirmation);
    }

    #[test]
    fn a_negated_agreement_is_not_an_affirmation() {
        assert!(!extract("não pode ser amanhã").affirmation);
        assert!(extract("pode ser, perfeito").affirmation);
    }

    #[test]
    fn substantive_answers_mark_needs_as_described() {
        assert!(extract("minha conta de luz está alta demais").needs_described);
        assert!(extract("já tenho placas instaladas").needs_described);
        assert!(!extract("oi, tudo bem?").needs_described);
    }

    #[test]
    fn handles_twenty_plus_common_phrases() {
        struct Case {
            text: &'static str,
            expect_bill: bool,
            expect_scheduling: bool,
            expect_disinterest: bool,
        }

        let cases = vec![
            Case {
                text: "oi, queria saber sobre energia solar",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "minha conta veio 850 esse mês",
                expect_bill: true,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "pago uns R$ 2.300 de luz",
                expect_bill: true,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "a fatura fica em torno de 1.500,00",
                expect_bill: true,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "my monthly bill is around $400",
                expect_bill: true,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "gastamos 3000 por mês com energia",
                expect_bill: true,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "podemos marcar uma reunião?",
                expect_bill: false,
                expect_scheduling: true,
                expect_disinterest: false,
            },
            Case {
                text: "quero agendar uma visita",
                expect_bill: false,
                expect_scheduling: true,
                expect_disinterest: false,
            },
            Case {
                text: "qual horário você tem livre?",
                expect_bill: false,
                expect_scheduling: true,
                expect_disinterest: false,
            },
            Case {
                text: "can we set up a call this week?",
                expect_bill: false,
                expect_scheduling: true,
                expect_disinterest: false,
            },
            Case {
                text: "não tenho interesse, obrigado",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: true,
            },
            Case {
                text: "pare de mandar mensagem",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: true,
            },
            Case {
                text: "not interested, remove me from this list",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: true,
            },
            Case {
                text: "sem interesse no momento",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: true,
            },
            Case {
                text: "sou o proprietário e a conta vem 980",
                expect_bill: true,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "já tenho sistema mas quero expandir",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "tenho contrato de fidelidade até dezembro",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "quero economizar na conta de luz",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "bom dia, me chamo Rafael",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "pode ser na quinta então",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "tell me more about the installation",
                expect_bill: false,
                expect_scheduling: false,
                expect_disinterest: false,
            },
            Case {
                text: "nossa conta mensal passa de 2.000",
                expect_bill: true,
                expect_scheduling: false,
                expect_disinterest: false,
            },
        ];

        for (index, case) in cases.iter().enumerate() {
            let cues = extract(case.text);
            assert_eq!(
                cues.bill_value.is_some(),
                case.expect_bill,
                "case {index}: bill for {:?}",
                case.text
            );
            assert_eq!(
                cues.scheduling_request,
                case.expect_scheduling,
                "case {index}: scheduling for {:?}",
                case.text
            );
            assert_eq!(
                cues.interest == Some(false),
                case.expect_disinterest,
                "case {index}: disinterest for {:?}",
                case.text
            );
        }
    }

    #[test]
    fn facts_apply_over_flags_without_erasing_answers() {
        let mut flags = QualificationFlags {
            has_existing_system: Some(true),
            ..QualificationFlags::default()
        };
        let facts = FactUpdates {
            bill_value: Some(Decimal::from(600)),
            is_decision_maker: Some(true),
            ..FactUpdates::default()
        };

        facts.apply_to(&mut flags);

        assert_eq!(flags.bill_value, Some(Decimal::from(600)));
        assert_eq!(flags.is_decision_maker, Some(true));
        assert_eq!(flags.has_existing_system, Some(true));
        assert_eq!(flags.explicit_interest, None);
    }

    #[test]
    fn an_empty_batch_yields_empty_facts() {
        let facts = FactUpdates::from_cues(&extract("hmm"));
        assert!(facts.is_empty());
    }
}
