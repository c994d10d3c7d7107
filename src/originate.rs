//! `originate` option rendering and result classification.

use crate::event::{BackgroundJobResult, EventMessage};
use crate::constants::EVENT_CHANNEL_HANGUP;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Options for `originate`, rendered as the brace-enclosed channel-variable
/// list FreeSWITCH expects (`{origination_uuid='…',originate_timeout=30}`).
///
/// Empty and zero values are omitted; an empty option set renders as `{}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginateOptions {
    /// UUID assigned to the new channel (`origination_uuid`). Minted by
    /// [`InboundSocket::originate`](crate::InboundSocket::originate) when
    /// absent.
    pub uuid: Option<String>,
    /// Caller ID name presented to the callee (`origination_caller_id_name`).
    pub caller_id_name: Option<String>,
    /// Caller ID number presented to the callee
    /// (`origination_caller_id_number`).
    pub caller_id_number: Option<String>,
    /// Dial retry count (`originate_retries`).
    pub retries: u32,
    /// Sleep between retries in milliseconds (`originate_retry_sleep_ms`).
    pub retry_sleep_ms: u32,
    /// Originate timeout in seconds (`originate_timeout`).
    pub timeout_seconds: u32,
    /// Application executed on the B-leg at originate time
    /// (`execute_on_originate`).
    pub execute_on_originate: Option<String>,
    /// Resolve the originate as soon as ring-ready is signalled
    /// (`return_ring_ready=true`).
    pub return_ring_ready: bool,
    /// Proceed without waiting for early media (`ignore_early_media=true`).
    pub ignore_early_media: bool,
    /// Bridge media directly between endpoints (`bypass_media=true`).
    pub bypass_media: bool,
    /// Additional channel variables, appended after the recognized options
    /// in key order.
    pub variables: BTreeMap<String, String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .filter(|s| !s.is_empty())
}

impl fmt::Display for OriginateOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();

        if let Some(uuid) = non_empty(&self.uuid) {
            parts.push(format!("origination_uuid='{}'", uuid));
        }
        if let Some(name) = non_empty(&self.caller_id_name) {
            parts.push(format!("origination_caller_id_name='{}'", name));
        }
        if let Some(number) = non_empty(&self.caller_id_number) {
            parts.push(format!("origination_caller_id_number={}", number));
        }
        if self.retries > 0 {
            parts.push(format!("originate_retries={}", self.retries));
        }
        if self.retry_sleep_ms > 0 {
            parts.push(format!("originate_retry_sleep_ms={}", self.retry_sleep_ms));
        }
        if self.timeout_seconds > 0 {
            parts.push(format!("originate_timeout={}", self.timeout_seconds));
        }
        if let Some(app) = non_empty(&self.execute_on_originate) {
            parts.push(format!("execute_on_originate='{}'", app));
        }
        if self.return_ring_ready {
            parts.push("return_ring_ready=true".to_string());
        }
        if self.ignore_early_media {
            parts.push("ignore_early_media=true".to_string());
        }
        if self.bypass_media {
            parts.push("bypass_media=true".to_string());
        }
        for (key, value) in &self.variables {
            parts.push(format!("{}={}", key, value));
        }

        write!(f, "{{{}}}", parts.join(","))
    }
}

/// Outcome of an `originate`: either the first qualifying channel event
/// (answer, progress or hangup) or the failed background job.
#[derive(Debug, Clone)]
pub struct OriginateResult {
    success: bool,
    error: Option<String>,
    event: Option<EventMessage>,
}

impl OriginateResult {
    /// Classify the winning channel event. `CHANNEL_HANGUP` fails with the
    /// hangup cause; answer and progress succeed.
    pub(crate) fn from_event(event: EventMessage) -> Self {
        let hung_up = event.event_name() == Some(EVENT_CHANNEL_HANGUP);
        let error = if hung_up {
            Some(
                event
                    .hangup_cause()
                    .unwrap_or("CHANNEL_HANGUP")
                    .to_string(),
            )
        } else {
            None
        };
        Self {
            success: !hung_up,
            error,
            event: Some(event),
        }
    }

    /// An originate whose background job failed before any channel event.
    pub(crate) fn from_background_job(result: &BackgroundJobResult) -> Self {
        Self {
            success: false,
            error: Some(
                result
                    .error()
                    .to_string(),
            ),
            event: None,
        }
    }

    /// Whether the call reached answer (or ring-ready, when requested).
    pub fn success(&self) -> bool {
        self.success
    }

    /// Failure reason: the hangup cause or the background job error.
    pub fn error(&self) -> &str {
        self.error
            .as_deref()
            .unwrap_or("")
    }

    /// The winning channel event, absent when the job dispatch failed.
    pub fn event(&self) -> Option<&EventMessage> {
        self.event
            .as_ref()
    }

    /// `Answer-State` off the winning event.
    pub fn answer_state(&self) -> Option<&str> {
        self.event
            .as_ref()?
            .answer_state()
    }

    /// `Hangup-Cause` off the winning event.
    pub fn hangup_cause(&self) -> Option<&str> {
        self.event
            .as_ref()?
            .hangup_cause()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_options_render_as_braces() {
        assert_eq!(OriginateOptions::default().to_string(), "{}");
    }

    #[test]
    fn only_ring_ready() {
        let options = OriginateOptions {
            return_ring_ready: true,
            ..Default::default()
        };
        assert_eq!(options.to_string(), "{return_ring_ready=true}");
    }

    #[test]
    fn uuid_and_caller_name_quoted() {
        let options = OriginateOptions {
            uuid: Some("u-1".into()),
            caller_id_name: Some("Test User".into()),
            caller_id_number: Some("5551234".into()),
            ..Default::default()
        };
        assert_eq!(
            options.to_string(),
            "{origination_uuid='u-1',origination_caller_id_name='Test User',origination_caller_id_number=5551234}"
        );
    }

    #[test]
    fn zero_and_empty_values_omitted() {
        let options = OriginateOptions {
            uuid: Some(String::new()),
            retries: 0,
            timeout_seconds: 0,
            ..Default::default()
        };
        assert_eq!(options.to_string(), "{}");
    }

    #[test]
    fn full_option_set_ordering() {
        let mut variables = BTreeMap::new();
        variables.insert("absolute_codec_string".to_string(), "PCMU".to_string());
        let options = OriginateOptions {
            uuid: Some("u".into()),
            caller_id_name: Some("N".into()),
            caller_id_number: Some("100".into()),
            retries: 3,
            retry_sleep_ms: 2000,
            timeout_seconds: 30,
            execute_on_originate: Some("start_dtmf".into()),
            return_ring_ready: true,
            ignore_early_media: true,
            bypass_media: true,
            variables,
        };
        let rendered = options.to_string();
        assert_eq!(
            rendered,
            "{origination_uuid='u',origination_caller_id_name='N',origination_caller_id_number=100,\
             originate_retries=3,originate_retry_sleep_ms=2000,originate_timeout=30,\
             execute_on_originate='start_dtmf',return_ring_ready=true,ignore_early_media=true,\
             bypass_media=true,absolute_codec_string=PCMU}"
        );
        assert!(!rendered.contains(",}"));
    }

    #[test]
    fn originate_result_from_hangup_event() {
        let body = "Event-Name: CHANNEL_HANGUP\nUnique-ID: u\nHangup-Cause: USER_BUSY\n\n";
        let frame = format!(
            "Content-Type: text/event-plain\nContent-Length: {}\n\n{}",
            body.len(),
            body
        );
        let mut parser = crate::parser::EslParser::new();
        parser
            .add_data(frame.as_bytes())
            .unwrap();
        let event = EventMessage::from_message(
            parser
                .parse_message()
                .unwrap()
                .unwrap(),
        )
        .unwrap();

        let result = OriginateResult::from_event(event);
        assert!(!result.success());
        assert_eq!(result.error(), "USER_BUSY");
        assert_eq!(result.hangup_cause(), Some("USER_BUSY"));
    }
}
