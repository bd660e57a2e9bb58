//! Server-rendered pages for the hosted checkout and PIX flows.

use std::fmt::Write as _;

use axum::http::StatusCode;
use paysim_core::{
  card::CardScenario,
  payment::{Payment, PaymentStatus},
};

const TEST_CARDS: [&str; 7] = ["0001", "0002", "0003", "0004", "0005", "0006", "0007"];

/// Escape text for use inside element content and quoted attributes.
pub fn escape(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  for c in raw.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      c => out.push(c),
    }
  }
  out
}

fn layout(title: &str, body: &str) -> String {
  format!(
    "<!DOCTYPE html>\n<html lang=\"pt-BR\">\n<head>\n<meta charset=\"utf-8\">\n\
     <title>{title}</title>\n\
     <style>body{{font-family:sans-serif;max-width:32rem;margin:2rem auto}}\
     dt{{font-weight:bold}}.status{{padding:.2rem .5rem;border:1px solid}}</style>\n\
     </head>\n<body>\n<h1>{title}</h1>\n{body}</body>\n</html>\n",
    title = escape(title),
  )
}

fn summary(payment: &Payment) -> String {
  let mut out = String::from("<dl>\n");
  let _ = writeln!(out, "<dt>Payment</dt><dd>{}</dd>", escape(&payment.id));
  let _ = writeln!(
    out,
    "<dt>Amount</dt><dd>{} {}</dd>",
    escape(&payment.currency),
    payment.amount
  );
  if let Some(description) = &payment.description {
    let _ = writeln!(out, "<dt>Description</dt><dd>{}</dd>", escape(description));
  }
  let _ = writeln!(
    out,
    "<dt>Status</dt><dd><span class=\"status\">{}</span> ({})</dd>",
    payment.status,
    escape(&payment.status_detail)
  );
  out.push_str("</dl>\n");
  out
}

pub fn checkout_page(payment: &Payment) -> String {
  let mut body = summary(payment);
  if payment.status != PaymentStatus::Pending {
    body.push_str("<p>This payment has already been processed.</p>\n");
    return layout("Checkout", &body);
  }

  let _ = write!(
    body,
    "<form method=\"post\" action=\"/checkout/{id}/process\">\n\
     <p><label>Card number <input name=\"card_number\" inputmode=\"numeric\" required></label></p>\n\
     <p><label>Cardholder <input name=\"cardholder_name\"></label></p>\n\
     <p><label>Method <select name=\"payment_method\">\
     <option value=\"credit_card\">Credit card</option>\
     <option value=\"debit_card\">Debit card</option></select></label></p>\n\
     <p><button type=\"submit\">Pay</button></p>\n</form>\n",
    id = escape(&payment.id),
  );

  body.push_str("<h2>Test cards</h2>\n<ul>\n");
  for suffix in TEST_CARDS {
    if let Some(scenario) = CardScenario::from_last_four(suffix) {
      let note = if scenario.schedules_chargeback() { ", flagged for chargeback" } else { "" };
      let _ = writeln!(
        body,
        "<li>…{suffix}: {} ({}){note}</li>",
        scenario.status(),
        scenario.status_detail()
      );
    }
  }
  body.push_str("</ul>\n");
  layout("Checkout", &body)
}

pub fn pix_page(payment: &Payment) -> String {
  let mut body = summary(payment);
  if let Some(code) = payment
    .point_of_interaction
    .as_ref()
    .and_then(|poi| poi.qr_code.as_deref())
  {
    let _ = writeln!(
      body,
      "<p>PIX copy-and-paste code:</p>\n<pre>{}</pre>",
      escape(code)
    );
  }
  if payment.status != PaymentStatus::Pending {
    body.push_str("<p>This payment has already been settled.</p>\n");
    return layout("PIX", &body);
  }

  let id = escape(&payment.id);
  for (status, label) in [("approved", "Confirm"), ("rejected", "Reject"), ("cancelled", "Cancel")] {
    let _ = writeln!(
      body,
      "<form method=\"post\" action=\"/pix/{id}/confirm\">\
       <input type=\"hidden\" name=\"status\" value=\"{status}\">\
       <button type=\"submit\">{label}</button></form>"
    );
  }
  layout("PIX", &body)
}

/// Shown after a form post from either hosted page.
pub fn result_page(payment: &Payment) -> String {
  layout("Payment result", &summary(payment))
}

pub fn error_page(status: StatusCode, message: &str) -> String {
  let body = format!(
    "<p><strong>{}</strong></p>\n<p>{}</p>\n",
    status.as_u16(),
    escape(message)
  );
  layout("Something went wrong", &body)
}
