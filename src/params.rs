use crate::cipher;
use crate::error::CipherError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

/// Hex length of the 16-byte XOR key.
pub const KEY_HEX_LEN: usize = 32;

// Escaped self-closing tags inside the Target element, e.g. `&lt;Task A="00" /&gt;`
static DECLARATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)&lt;([\w\s="]+)/&gt;"#).expect("declaration pattern"));
static PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(\w+)="([0-9a-f]+)""#).expect("pair pattern"));

/// One escaped task invocation: the task name and its attribute pairs in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterDeclaration {
    pub taskname: String,
    pub pairs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskParameterSet {
    pub params: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_parameter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xor_key: Option<String>,
    pub decrypted_strings: Vec<String>,
}

impl TaskParameterSet {
    /// Every pair kept as a plain entry, nothing decrypted. Used when the
    /// key cannot be resolved.
    pub fn undecrypted(declaration: &ParameterDeclaration) -> Self {
        Self {
            params: entries(declaration.pairs.iter()),
            ..Self::default()
        }
    }
}

fn pair(token: &str) -> Option<(String, String)> {
    PAIR_RE
        .captures(token)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
}

// Later values for a repeated name overwrite in place
fn entries<'a>(pairs: impl Iterator<Item = &'a (String, String)>) -> Vec<Parameter> {
    let mut params: Vec<Parameter> = Vec::new();
    for (name, value) in pairs {
        match params.iter_mut().find(|p| &p.name == name) {
            Some(existing) => existing.value = value.clone(),
            None => params.push(Parameter {
                name: name.clone(),
                value: value.clone(),
            }),
        }
    }
    params
}

fn parse_declaration(body: &str) -> Option<ParameterDeclaration> {
    let mut tokens: Vec<&str> = body.trim_start().split(char::is_whitespace).collect();
    let taskname = tokens.remove(0);
    if taskname.is_empty() {
        return None;
    }
    // The token before `/&gt;` is the self-closing artifact unless it is a real pair
    if tokens.last().is_some_and(|last| pair(last).is_none()) {
        tokens.pop();
    }
    let pairs = tokens
        .into_iter()
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            let parsed = pair(token);
            if parsed.is_none() {
                debug!("Skipping token {:?} of task {}", token, taskname);
            }
            parsed
        })
        .collect();

    Some(ParameterDeclaration {
        taskname: taskname.to_string(),
        pairs,
    })
}

/// Finds every escaped task invocation in the Target element text.
pub fn parse_declarations(target: &str) -> Vec<ParameterDeclaration> {
    DECLARATION_RE
        .captures_iter(target)
        .filter_map(|caps| parse_declaration(&caps[1]))
        .collect()
}

/// Splits out the XOR key (the only value of [`KEY_HEX_LEN`] characters)
/// and decrypts every other value in declaration order.
///
/// # Errors
///
/// Fails when encrypted values exist without exactly one key candidate,
/// or when a value does not decrypt.
pub fn decode_parameters(
    declaration: &ParameterDeclaration,
) -> Result<TaskParameterSet, CipherError> {
    let (keys, values): (Vec<_>, Vec<_>) = declaration
        .pairs
        .iter()
        .partition(|(_, value)| value.len() == KEY_HEX_LEN);

    let key = match keys.as_slice() {
        [] if values.is_empty() => None,
        [] => return Err(CipherError::MissingKey(declaration.taskname.clone())),
        [key] => Some(*key),
        _ => {
            return Err(CipherError::AmbiguousKey {
                task: declaration.taskname.clone(),
                count: keys.len(),
            })
        }
    };

    let decrypted_strings = match key {
        Some((_, key)) => values
            .iter()
            .map(|(_, value)| cipher::decrypt(key, value))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(TaskParameterSet {
        params: entries(values.into_iter()),
        key_parameter: key.map(|(name, _)| name.clone()),
        xor_key: key.map(|(_, value)| value.clone()),
        decrypted_strings,
    })
}
