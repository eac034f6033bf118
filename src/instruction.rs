// 🧾 Instruction Parser - normalized instruction text → typed payment mutation
//
// Grammar is an ordered list of independent rules, each a pure function
// `text -> payload | none`, tried in priority order (first match wins):
//
//   1. add payment for <borrower> on <type> loan with amount <amt>, method <m>,
//      status <pending|completed|failed|refunded>, date <date>[, notes <notes>]
//   2. update payment for <borrower> on <type> loan <field> to <value>
//   3. delete payment for <borrower> on <type> loan
//   4. delete payment for <borrower> on <type> loan where <field> is <value>
//
// Matching is case-insensitive. A rule that matches but whose captured value
// fails coercion aborts with a ValidationError instead of falling through.

use crate::entities::{FieldValue, PaymentField, PaymentStatus};
use crate::error::ValidationError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;

/// Marker the completion provider emits when it cannot produce an instruction
pub const AMBIGUOUS_MARKER: &str = "ambiguous";

// ============================================================================
// PARSED INSTRUCTION
// ============================================================================

/// Borrower + loan labels exactly as they appeared in the instruction
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTarget {
    pub borrower_name: String,
    pub loan_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPayment {
    #[serde(flatten)]
    pub target: PaymentTarget,
    pub payment_amount: f64,
    pub payment_method: String,
    pub status: PaymentStatus,
    pub payment_date: NaiveDate,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayment {
    #[serde(flatten)]
    pub target: PaymentTarget,
    pub field: PaymentField,
    pub value: FieldValue,
}

/// Conditional delete. The value is kept as captured text, uncoerced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteWhere {
    #[serde(flatten)]
    pub target: PaymentTarget,
    pub field: PaymentField,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload")]
pub enum ParsedInstruction {
    Add(AddPayment),
    Update(UpdatePayment),
    Delete(PaymentTarget),
    DeleteWhere(DeleteWhere),
    Ambiguous { text: String },
    Unrecognized { text: String },
}

impl ParsedInstruction {
    pub fn kind(&self) -> &'static str {
        match self {
            ParsedInstruction::Add(_) => "Add",
            ParsedInstruction::Update(_) => "Update",
            ParsedInstruction::Delete(_) => "Delete",
            ParsedInstruction::DeleteWhere(_) => "DeleteWhere",
            ParsedInstruction::Ambiguous { .. } => "Ambiguous",
            ParsedInstruction::Unrecognized { .. } => "Unrecognized",
        }
    }

    /// True for the kinds that lead to a mutation attempt
    pub fn is_actionable(&self) -> bool {
        !matches!(
            self,
            ParsedInstruction::Ambiguous { .. } | ParsedInstruction::Unrecognized { .. }
        )
    }
}

// ============================================================================
// VALUE COERCION
// ============================================================================

static ISO_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static DMY_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}/\d{2}/\d{4}$").unwrap());

/// Money: thousands separators stripped, plain decimal notation only
pub fn parse_amount(raw: &str) -> Result<f64, ValidationError> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();

    let plain_decimal = !cleaned.is_empty()
        && cleaned
            .strip_prefix('-')
            .unwrap_or(&cleaned)
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.');

    match cleaned.parse::<f64>() {
        Ok(amount) if plain_decimal && amount.is_finite() => Ok(amount),
        _ => Err(ValidationError::InvalidAmountFormat(raw.trim().to_string())),
    }
}

/// Strict dual-format date: `YYYY-MM-DD` or `DD/MM/YYYY`, nothing else
pub fn parse_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let value = raw.trim();
    let parsed = if ISO_DATE.is_match(value) {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
    } else if DMY_DATE.is_match(value) {
        NaiveDate::parse_from_str(value, "%d/%m/%Y").ok()
    } else {
        None
    };

    parsed.ok_or_else(|| ValidationError::InvalidDateFormat(value.to_string()))
}

/// "pending" → "Pending", "COMPLETED" → "Completed"
pub fn capitalize_first(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Field-specific coercion shared by Add-style values and Update
pub fn coerce_field_value(field: PaymentField, raw: &str) -> Result<FieldValue, ValidationError> {
    let value = raw.trim();
    match field {
        PaymentField::PaymentAmount => parse_amount(value).map(FieldValue::Amount),
        PaymentField::PaymentDate => parse_date(value).map(FieldValue::Date),
        PaymentField::Status => Ok(FieldValue::Text(capitalize_first(value))),
        PaymentField::PaymentMethod | PaymentField::Notes => Ok(FieldValue::Text(value.to_string())),
    }
}

// ============================================================================
// GRAMMAR RULES
// ============================================================================

type RuleResult = Option<Result<ParsedInstruction, ValidationError>>;

/// One grammar rule: a name for diagnostics and a pure matcher
pub struct GrammarRule {
    pub name: &'static str,
    pub matcher: fn(&str) -> RuleResult,
}

static ADD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)add payment for\s+(?P<borrower>.+?)\s+on\s+(?P<loan>.+?)\s+loan\s+with\s+amount\s*(?P<amount>\S+?)\s*,?\s*method\s*(?P<method>[^,]+?)\s*,?\s*status\s*(?P<status>pending|completed|failed|refunded)\s*,?\s*date\s*(?P<date>[^\s,]+)(?:\s*,?\s*notes?\b\s*(?P<notes>.*))?",
    )
    .unwrap()
});

static UPDATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)update payment for\s+(?P<borrower>.+?)\s+on\s+(?P<loan>.+?)\s+loan\s+(?P<field>paymentAmount|paymentDate|paymentMethod|status|notes)\s+to\s+(?P<value>.+)",
    )
    .unwrap()
});

static DELETE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)delete payment for\s+(?P<borrower>.+?)\s+on\s+(?P<loan>.+?)\s+loan\s*$").unwrap()
});

static DELETE_WHERE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)delete payment for\s+(?P<borrower>.+?)\s+on\s+(?P<loan>.+?)\s+loan\s+where\s+(?P<field>paymentAmount|paymentDate|paymentMethod|status|notes)\s+is\s+(?P<value>.+)",
    )
    .unwrap()
});

static WHERE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bwhere\b").unwrap());

fn capture<'t>(caps: &Captures<'t>, name: &str) -> &'t str {
    caps.name(name).map(|m| m.as_str().trim()).unwrap_or("")
}

fn target_of(caps: &Captures) -> PaymentTarget {
    PaymentTarget {
        borrower_name: capture(caps, "borrower").to_string(),
        loan_type: capture(caps, "loan").to_string(),
    }
}

fn field_of(caps: &Captures) -> Option<PaymentField> {
    capture(caps, "field").parse().ok()
}

fn match_add(text: &str) -> RuleResult {
    let caps = ADD_RE.captures(text)?;

    let build = || -> Result<ParsedInstruction, ValidationError> {
        let payment_amount = parse_amount(capture(&caps, "amount"))?;
        let payment_date = parse_date(capture(&caps, "date"))?;
        // The pattern only admits the four statuses, so this cannot fail
        let status = capitalize_first(capture(&caps, "status"))
            .parse()
            .unwrap_or(PaymentStatus::Pending);

        Ok(ParsedInstruction::Add(AddPayment {
            target: target_of(&caps),
            payment_amount,
            payment_method: capture(&caps, "method").to_string(),
            status,
            payment_date,
            notes: capture(&caps, "notes").to_string(),
        }))
    };

    Some(build())
}

fn match_update(text: &str) -> RuleResult {
    let caps = UPDATE_RE.captures(text)?;
    let field = field_of(&caps)?;

    Some(
        coerce_field_value(field, capture(&caps, "value")).map(|value| {
            ParsedInstruction::Update(UpdatePayment {
                target: target_of(&caps),
                field,
                value,
            })
        }),
    )
}

fn match_delete(text: &str) -> RuleResult {
    let caps = DELETE_RE.captures(text)?;
    let target = target_of(&caps);

    // "... loan where notes is car loan" ends in "loan" too; leave it to the where rule
    if WHERE_WORD.is_match(&target.loan_type) {
        return None;
    }

    Some(Ok(ParsedInstruction::Delete(target)))
}

fn match_delete_where(text: &str) -> RuleResult {
    let caps = DELETE_WHERE_RE.captures(text)?;
    let field = field_of(&caps)?;

    Some(Ok(ParsedInstruction::DeleteWhere(DeleteWhere {
        target: target_of(&caps),
        field,
        value: capture(&caps, "value").to_string(),
    })))
}

// ============================================================================
// PARSER
// ============================================================================

pub struct InstructionParser {
    rules: Vec<GrammarRule>,
}

impl InstructionParser {
    pub fn new() -> Self {
        InstructionParser {
            rules: vec![
                GrammarRule { name: "add", matcher: match_add },
                GrammarRule { name: "update", matcher: match_update },
                GrammarRule { name: "delete", matcher: match_delete },
                GrammarRule { name: "delete_where", matcher: match_delete_where },
            ],
        }
    }

    pub fn rules(&self) -> &[GrammarRule] {
        &self.rules
    }

    /// Classify provider output. The ambiguity marker anywhere in the text
    /// short-circuits before any grammar rule runs.
    pub fn interpret(&self, generated: &str) -> Result<ParsedInstruction, ValidationError> {
        let text = generated.trim();
        if text.to_lowercase().contains(AMBIGUOUS_MARKER) {
            return Ok(ParsedInstruction::Ambiguous {
                text: text.to_string(),
            });
        }
        self.parse(text)
    }

    /// Run the grammar rules in priority order
    pub fn parse(&self, instruction: &str) -> Result<ParsedInstruction, ValidationError> {
        let text = instruction.trim();

        for rule in &self.rules {
            if let Some(result) = (rule.matcher)(text) {
                tracing::debug!(rule = rule.name, "instruction matched");
                return result;
            }
        }

        Ok(ParsedInstruction::Unrecognized {
            text: text.to_string(),
        })
    }
}

impl Default for InstructionParser {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
