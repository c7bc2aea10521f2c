use html_escape::{encode_double_quoted_attribute, encode_text};
use url::Url;

/// Auto-submitting HTML form that forwards the browser with a POST.
///
/// The same fields are also appended to the action's query string, so targets
/// that only read query parameters see them too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectForm {
    action: String,
    fields: Vec<(String, String)>,
}

impl RedirectForm {
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn optional_field(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    /// The action URL with every field on its query string. Falls back to the
    /// bare action when it is not an absolute URL.
    pub fn target(&self) -> String {
        match Url::parse(&self.action) {
            Ok(mut url) => {
                if !self.fields.is_empty() {
                    let mut pairs = url.query_pairs_mut();
                    for (name, value) in &self.fields {
                        pairs.append_pair(name, value);
                    }
                }
                url.into()
            }
            Err(_) => self.action.clone(),
        }
    }

    pub fn render(&self) -> String {
        let mut inputs = String::new();
        for (name, value) in &self.fields {
            inputs.push_str(&format!(
                "<input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
                encode_double_quoted_attribute(name),
                encode_double_quoted_attribute(value)
            ));
        }
        format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Redirecting</title></head>\n\
             <body onload=\"document.forms[0].submit()\">\n\
             <form method=\"post\" action=\"{}\">\n{}\
             <noscript><button type=\"submit\">Continue</button></noscript>\n\
             </form>\n</body>\n</html>\n",
            encode_double_quoted_attribute(&self.target()),
            inputs
        )
    }
}

/// Generic page for requests that cannot be correlated with a payment.
pub fn error_page(message: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Payment error</title></head>\n\
         <body><h1>Payment error</h1><p>{}</p></body>\n</html>\n",
        encode_text(message)
    )
}
