//! Server-side page rendering. The whole conversation is redrawn on every
//! load; the only client-side logic is the live display of a streaming reply.

use omnichat_core::{Message, Model, Part, Role, TEMPERATURE_RANGE, TEMPERATURE_STEP};

use crate::session::ChatSession;

pub const KEY_WARNING: &str =
    "Please introduce your OpenAI API Key (make sure to have funds) to continue...";

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; display: flex; min-height: 100vh; }
aside { width: 18rem; padding: 1rem; background: #f4f4f6; border-right: 1px solid #ddd; }
aside label { display: block; margin-top: 1rem; font-size: .9rem; }
aside input, aside select { width: 100%; box-sizing: border-box; }
main { flex: 1; max-width: 48rem; margin: 0 auto; padding: 1rem; }
header { text-align: center; padding: 10px; }
header h1 { color: #4CAF50; }
header p { font-size: 20px; color: #888; }
.warning { background: #fff4e5; border: 1px solid #f0b35b; padding: .75rem; border-radius: 4px; }
.message { padding: .5rem .75rem; margin: .5rem 0; border-radius: 6px; }
.message.user { background: #eef4ff; }
.message.assistant { background: #f6f6f6; }
.message .role { font-weight: bold; font-size: .8rem; text-transform: uppercase; color: #666; }
.message .text { white-space: pre-wrap; margin: .25rem 0; }
.message img { max-width: 100%; border-radius: 4px; }
#live .text:empty::after { content: "Waiting for response..."; color: #999; font-style: italic; }
#prompt-form { display: flex; gap: .5rem; margin-top: 1rem; }
#prompt-form input[type=text] { flex: 1; }
.error { color: #b00020; }
"#;

const SCRIPT: &str = r#"
const form = document.getElementById('prompt-form');
if (form) {
  form.addEventListener('submit', async (ev) => {
    ev.preventDefault();
    const data = new FormData(form);
    const live = document.getElementById('live');
    const text = live.querySelector('.text');
    const status = document.getElementById('status');
    live.hidden = false;
    form.querySelector('button').disabled = true;

    const resp = await fetch('/chat', { method: 'POST', body: data });
    if (!resp.ok) {
      const body = await resp.json().catch(() => ({ error: resp.statusText }));
      status.textContent = body.error;
      live.hidden = true;
      form.querySelector('button').disabled = false;
      return;
    }

    const reader = resp.body.getReader();
    const decoder = new TextDecoder();
    let pending = '';
    for (;;) {
      const { value, done } = await reader.read();
      if (done) break;
      pending += decoder.decode(value, { stream: true });
      let cut;
      while ((cut = pending.indexOf('\n\n')) >= 0) {
        const block = pending.slice(0, cut);
        pending = pending.slice(cut + 2);
        let kind = 'message', payload = '';
        for (const line of block.split('\n')) {
          if (line.startsWith('event:')) kind = line.slice(6).trim();
          else if (line.startsWith('data:')) payload += line.slice(5).trim();
        }
        if (!payload) continue;
        const msg = JSON.parse(payload);
        if (kind === 'fragment') text.textContent += msg.text;
        else if (kind === 'error') status.textContent = msg.error;
      }
    }
    window.location.reload();
  });
}
"#;

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn render_part(part: &Part) -> String {
    match part {
        Part::Text { text } => format!("<div class=\"text\">{}</div>", escape_html(text)),
        Part::ImageUrl { image_url } => {
            format!("<img src=\"{}\" alt=\"uploaded image\">", escape_html(&image_url.url))
        }
    }
}

pub fn render_message(message: &Message) -> String {
    let label = match message.role {
        Role::User => "You",
        Role::Assistant => "Assistant",
    };
    let mut html = format!(
        "<div class=\"message {}\"><div class=\"role\">{}</div>",
        message.role.as_str(),
        label
    );
    for part in &message.content {
        html.push_str(&render_part(part));
    }
    html.push_str("</div>\n");
    html
}

fn render_sidebar(session: &ChatSession) -> String {
    let selected = session.generation.resolved_model();
    let options: String = Model::all()
        .into_iter()
        .map(|model| {
            format!(
                "<option value=\"{}\"{}>{}</option>",
                model.as_str(),
                if model == selected { " selected" } else { "" },
                model.display_name()
            )
        })
        .collect();

    format!(
        r#"<aside>
<form method="post" action="/settings">
<label>Paste your OpenAI API Key (https://platform.openai.com/)
<input type="password" name="api_key" value="{key}" autocomplete="off"></label>
<label>Select a model:
<select name="model">{options}</select></label>
<label>Temperature: <output id="temp-out">{temp:.1}</output>
<input type="range" name="temperature" min="{min:.1}" max="{max:.1}" step="{step:.1}" value="{temp:.1}" oninput="document.getElementById('temp-out').value = Number(this.value).toFixed(1)"></label>
<p><button type="submit">Apply</button></p>
</form>
<form method="post" action="/reset"><button type="submit">Reset conversation</button></form>
</aside>"#,
        key = escape_html(&session.api_key),
        options = options,
        temp = session.generation.resolved_temperature(),
        min = TEMPERATURE_RANGE.start(),
        max = TEMPERATURE_RANGE.end(),
        step = TEMPERATURE_STEP,
    )
}

/// Full page for one session.
pub fn render_page(session: &ChatSession) -> String {
    let mut body = String::new();

    if session.credential().is_err() {
        body.push_str(&format!("<p class=\"warning\">&#11013; {}</p>\n", KEY_WARNING));
    } else {
        body.push_str("<section id=\"conversation\">\n");
        for message in session.conversation.all() {
            body.push_str(&render_message(message));
        }
        body.push_str(
            "<div id=\"live\" class=\"message assistant\" hidden><div class=\"role\">Assistant</div><div class=\"text\"></div></div>\n",
        );
        body.push_str("</section>\n");
        body.push_str(
            r#"<form id="prompt-form" enctype="multipart/form-data">
<input type="text" name="prompt" placeholder="Hi! I am the latest omnimodel from OpenAI, ask me anything!" autocomplete="off">
<input type="file" name="image" accept="image/png,image/jpeg,image/gif,image/webp">
<button type="submit">Send</button>
</form>
<p id="status" class="error"></p>
"#,
        );
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>GPT-4o Chatbot Experience</title>
<style>{style}</style>
</head>
<body>
{sidebar}
<main>
<header>
<h1>The Ultimate GPT-4o Chatbot Experience</h1>
<p>Unleash the power of AI with our advanced assistant!</p>
</header>
{body}
</main>
<script>{script}</script>
</body>
</html>
"#,
        style = STYLE,
        sidebar = render_sidebar(session),
        body = body,
        script = SCRIPT,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionDefaults;
    use omnichat_core::GenerationConfig;

    fn session(api_key: &str) -> ChatSession {
        ChatSession::new(&SessionDefaults {
            api_key: api_key.into(),
            generation: GenerationConfig::new(),
        })
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_parts_render_by_kind() {
        assert_eq!(
            render_part(&Part::text("1 < 2")),
            "<div class=\"text\">1 &lt; 2</div>"
        );
        assert!(render_part(&Part::image("data:image/png;base64,AAAA"))
            .starts_with("<img src=\"data:image/png;base64,AAAA\""));
    }

    #[test]
    fn test_warning_replaces_chat_without_key() {
        let html = render_page(&session(""));
        assert!(html.contains(KEY_WARNING));
        assert!(!html.contains("prompt-form\" enctype"));
    }

    #[test]
    fn test_messages_render_in_order() {
        let mut s = session("sk-test");
        s.conversation.append(Message::user_text("first question"));
        s.conversation.append(Message::assistant_text("first answer"));
        let html = render_page(&s);

        assert!(!html.contains(KEY_WARNING));
        let q = html.find("first question").unwrap();
        let a = html.find("first answer").unwrap();
        assert!(q < a);
    }

    #[test]
    fn test_sidebar_reflects_settings() {
        let mut s = session("sk-test");
        s.generation = GenerationConfig::new()
            .with_model(Model::Gpt4Turbo)
            .with_temperature(1.2)
            .unwrap();
        let html = render_page(&s);
        assert!(html.contains("<option value=\"gpt-4-turbo\" selected>"));
        assert!(html.contains("value=\"1.2\""));
        assert!(html.contains("step=\"0.1\""));
    }
}
