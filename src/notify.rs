//! Parent-notification composer.
//!
//! Pure text shaping: the manager decides when to notify and with which
//! snapshot of delegation state; this module only renders it.

use crate::delegation::Delegation;
use crate::format::truncate;

const SNIPPET_LEN: usize = 80;

/// A composed notification. `no_reply` marks intermediate notices; the final
/// digest of a batch expects the parent to respond by reading results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub body: String,
    pub no_reply: bool,
}

/// Compose the notification for one resolved delegation.
///
/// `still_running` is the number of the parent's delegations not yet
/// resolved; `resolved` is every non-running delegation of the same parent
/// (including `delegation` itself), used for the all-complete digest.
pub fn compose(delegation: &Delegation, still_running: usize, resolved: &[Delegation]) -> Notice {
    if still_running == 0 {
        Notice {
            body: compose_digest(resolved),
            no_reply: false,
        }
    } else {
        Notice {
            body: compose_interim(delegation, still_running),
            no_reply: true,
        }
    }
}

fn compose_digest(resolved: &[Delegation]) -> String {
    let mut body = String::from("All delegated tasks have finished.\n");
    for d in resolved {
        let label = d
            .title
            .clone()
            .unwrap_or_else(|| truncate(&d.prompt, SNIPPET_LEN));
        body.push_str(&format!("- {} [{}]: {}\n", d.id, d.status, label));
    }
    body.push_str(
        "\nCall the delegation read operation with each id above to collect the results.",
    );
    body
}

fn compose_interim(delegation: &Delegation, still_running: usize) -> String {
    let mut body = format!(
        "Delegated task {} ({}) finished with status {} after {}.",
        delegation.id,
        delegation.agent,
        delegation.status,
        delegation.duration_string()
    );
    if let Some(error) = &delegation.error {
        body.push_str(&format!("\nError: {error}"));
    }
    let noun = if still_running == 1 { "task is" } else { "tasks are" };
    body.push_str(&format!(
        "\n{still_running} delegated {noun} still running. Do not poll for them; \
         continue with other work and you will be notified when they finish."
    ));
    body
}
