//! # Upload Page
//!
//! Server-rendered HTML for `GET /`: the upload form, the last result or
//! error, and the script that keeps the heartbeat going and drives the Quit
//! button. Every dynamic value is HTML-escaped.

use crate::transcription::{ModelSize, OutputFormat};
use std::fmt::Write;

/// What one render of the page shows.
#[derive(Debug, Clone)]
pub struct PageView<'a> {
    pub transcription: Option<&'a str>,
    pub error: Option<&'a str>,
    pub model: ModelSize,
    pub format: OutputFormat,
    pub max_upload_mb: u64,
    /// How often the page posts `/heartbeat`.
    pub heartbeat_every_ms: u64,
}

/// Escape text for use in element content and quoted attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn model_options(selected: ModelSize) -> String {
    ModelSize::ALL.iter().fold(String::new(), |mut out, size| {
        let _ = write!(
            out,
            r#"<option value="{}"{}>{}</option>"#,
            size.as_str(),
            if *size == selected { " selected" } else { "" },
            size.description()
        );
        out
    })
}

fn format_options(selected: OutputFormat) -> String {
    OutputFormat::ALL.iter().fold(String::new(), |mut out, format| {
        let _ = write!(
            out,
            r#"<option value="{}"{}>{}</option>"#,
            format.as_str(),
            if *format == selected { " selected" } else { "" },
            format.description()
        );
        out
    })
}

fn error_block(error: Option<&str>) -> String {
    error
        .map(|msg| format!(r#"<div class="alert" role="alert">{}</div>"#, escape_html(msg)))
        .unwrap_or_default()
}

fn result_block(transcription: Option<&str>, format: OutputFormat) -> String {
    let Some(text) = transcription else {
        return String::new();
    };
    format!(
        r#"<section class="result">
  <h2>Transcription</h2>
  <textarea id="transcription" readonly rows="16">{text}</textarea>
  <div class="actions">
    <button type="button" onclick="copyResult()">Copy</button>
    <button type="button" onclick="downloadResult('{ext}')">Download .{ext}</button>
  </div>
</section>"#,
        text = escape_html(text),
        ext = format.as_str(),
    )
}

/// Render the whole page.
pub fn render_index(view: &PageView<'_>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>WhisperTrans</title>
<style>
  body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif; max-width: 760px; margin: 2rem auto; padding: 0 1rem; color: #222; }}
  header {{ display: flex; justify-content: space-between; align-items: center; }}
  form {{ display: grid; gap: 0.8rem; margin: 1.5rem 0; }}
  label {{ font-weight: 600; }}
  select, input, textarea {{ width: 100%; box-sizing: border-box; padding: 0.4rem; }}
  textarea {{ font-family: ui-monospace, monospace; }}
  .alert {{ background: #fdecea; border: 1px solid #f5c2c0; padding: 0.8rem; border-radius: 4px; }}
  .hint {{ color: #666; font-size: 0.9rem; }}
  .actions {{ display: flex; gap: 0.5rem; margin-top: 0.5rem; }}
</style>
</head>
<body>
<header>
  <h1>WhisperTrans</h1>
  <button type="button" id="quit" onclick="quitApp()">Quit</button>
</header>
{error}
<form method="post" action="/" enctype="multipart/form-data" onsubmit="startTranscription()">
  <label for="audio_file">Audio file</label>
  <input type="file" id="audio_file" name="audio_file" accept="audio/*">
  <span class="hint">Up to {max_upload_mb} MB. Everything stays on this machine.</span>
  <label for="model">Model</label>
  <select id="model" name="model">{model_options}</select>
  <label for="format">Output format</label>
  <select id="format" name="format">{format_options}</select>
  <label for="language">Language (optional)</label>
  <input type="text" id="language" name="language" placeholder="Leave empty to detect automatically">
  <button type="submit" id="submit">Transcribe</button>
  <span class="hint" id="progress" hidden>Transcribing... the first run of a model includes downloading it.</span>
</form>
{result}
<script>
  function beat() {{ fetch('/heartbeat', {{ method: 'POST' }}).catch(function () {{}}); }}
  beat();
  setInterval(beat, {heartbeat_every_ms});

  function startTranscription() {{
    document.getElementById('submit').disabled = true;
    document.getElementById('progress').hidden = false;
  }}

  function quitApp() {{
    fetch('/shutdown', {{ method: 'POST' }}).finally(function () {{
      document.body.innerHTML = '<h1>WhisperTrans has stopped</h1><p>You can close this tab.</p>';
    }});
  }}

  function copyResult() {{
    var area = document.getElementById('transcription');
    navigator.clipboard.writeText(area.value);
  }}

  function downloadResult(ext) {{
    var text = document.getElementById('transcription').value;
    var link = document.createElement('a');
    link.href = URL.createObjectURL(new Blob([text], {{ type: 'text/plain' }}));
    link.download = 'transcription.' + ext;
    link.click();
    URL.revokeObjectURL(link.href);
  }}
</script>
</body>
</html>
"#,
        error = error_block(view.error),
        max_upload_mb = view.max_upload_mb,
        model_options = model_options(view.model),
        format_options = format_options(view.format),
        result = result_block(view.transcription, view.format),
        heartbeat_every_ms = view.heartbeat_every_ms,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view<'a>() -> PageView<'a> {
        PageView {
            transcription: None,
            error: None,
            model: ModelSize::Base,
            format: OutputFormat::Txt,
            max_upload_mb: 200,
            heartbeat_every_ms: 10_000,
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#x27;Jerry&#x27;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_empty_page_has_form_and_no_result() {
        let html = render_index(&view());
        assert!(html.contains(r#"name="audio_file""#));
        assert!(html.contains(r#"<option value="base" selected>"#));
        assert!(html.contains(r#"<option value="txt" selected>"#));
        assert!(!html.contains("id=\"transcription\""));
        assert!(!html.contains("class=\"alert\""));
        assert!(html.contains("setInterval(beat, 10000)"));
    }

    #[test]
    fn test_result_and_error_are_escaped() {
        let mut page = view();
        page.transcription = Some("1 < 2 </textarea><script>");
        page.error = Some("<img src=x>");
        page.format = OutputFormat::Srt;

        let html = render_index(&page);
        assert!(html.contains("1 &lt; 2 &lt;/textarea&gt;&lt;script&gt;"));
        assert!(html.contains("&lt;img src=x&gt;"));
        assert!(html.contains("Download .srt"));
        assert!(html.contains(r#"<option value="srt" selected>"#));
    }
}
