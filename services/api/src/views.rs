//! Server-rendered pages for the customer-facing returns flow.

use crate::infra::{FieldError, LookupRequest, IDENTIFIER_MAX_LEN, ORDER_NUMBER_MAX_LEN};
use returns_portal::returns::{EligibilityRow, Order};
use std::fmt::Write;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

pub(crate) fn lookup_page(
    form: &LookupRequest,
    errors: &[FieldError],
    notice: Option<&str>,
) -> String {
    let mut body = String::from("<h1>Start a return</h1>\n");
    if let Some(notice) = notice {
        let _ = writeln!(body, "<p class=\"error\">{}</p>", escape(notice));
    }

    body.push_str("<form method=\"post\" action=\"/returns/\">\n");
    push_input(
        &mut body,
        "order_number",
        "Order number",
        &form.order_number,
        ORDER_NUMBER_MAX_LEN,
        errors,
    );
    push_input(
        &mut body,
        "identifier",
        "Email or postal code",
        &form.identifier,
        IDENTIFIER_MAX_LEN,
        errors,
    );
    body.push_str("<button type=\"submit\">Find my order</button>\n</form>\n");

    layout("Start a return", &body)
}

fn push_input(
    body: &mut String,
    name: &str,
    label: &str,
    value: &str,
    max_len: usize,
    errors: &[FieldError],
) {
    let _ = writeln!(
        body,
        "<label for=\"{name}\">{label}</label>\n<input id=\"{name}\" name=\"{name}\" maxlength=\"{max_len}\" value=\"{}\" required>",
        escape(value)
    );
    for error in errors.iter().filter(|error| error.field == name) {
        let _ = writeln!(body, "<p class=\"error\">{}</p>", escape(&error.message));
    }
}

pub(crate) fn articles_page(order: &Order, rows: &[EligibilityRow]) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "<h1>Order {}</h1>", escape(&order.order_number));
    let _ = writeln!(
        body,
        "<address>{}<br>{}<br>{} {}</address>",
        escape(&order.recipient),
        escape(&order.street),
        escape(&order.zip),
        escape(&order.city)
    );
    let _ = writeln!(
        body,
        "<p>Ordered {} &middot; delivered {} &middot; {}-day return window</p>",
        order.purchased_at.format(DATE_FORMAT),
        order.delivered_at.format(DATE_FORMAT),
        order.return_window_days
    );

    body.push_str(
        "<table>\n<thead><tr><th>Article</th><th>SKU</th><th>Price</th><th>Bought</th>\
         <th>Returned</th><th>Status</th><th>Return quantity</th></tr></thead>\n<tbody>\n",
    );
    for row in rows {
        push_row(&mut body, row);
    }
    body.push_str("</tbody>\n</table>\n<p><a href=\"/returns/\">Look up another order</a></p>\n");

    layout(&format!("Order {}", order.order_number), &body)
}

fn push_row(body: &mut String, row: &EligibilityRow) {
    let item = &row.item;
    let quantity = if row.selectable {
        let options: String = row
            .quantity_options
            .iter()
            .map(|qty| format!("<option value=\"{qty}\">{qty}</option>"))
            .collect();
        format!(
            "<select name=\"qty_{}\">{options}</select>",
            escape(&item.sku)
        )
    } else {
        "-".to_string()
    };

    let _ = writeln!(
        body,
        "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{:.2}</td><td>{}</td><td>{}</td>\
         <td title=\"{}\">{}</td><td>{quantity}</td></tr>",
        escape(&row.result.flag),
        escape(&item.name),
        escape(&item.sku),
        item.price,
        item.quantity,
        item.quantity_returned,
        escape(&row.result.reason),
        escape(row.result.returnable.label()),
    );
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{body}</body>\n</html>\n",
        escape(title)
    )
}

pub(crate) fn escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_neutralises_markup() {
        assert_eq!(
            escape("<b>\"Tom\" & 'Jerry'</b>"),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#x27;Jerry&#x27;&lt;/b&gt;"
        );
    }

    #[test]
    fn lookup_page_echoes_input_and_errors() {
        let form = LookupRequest {
            order_number: "<RMA>".to_string(),
            identifier: String::new(),
        };
        let errors = vec![FieldError {
            field: "identifier",
            message: "This field is required.".to_string(),
        }];

        let html = lookup_page(&form, &errors, None);
        assert!(html.contains("value=\"&lt;RMA&gt;\""));
        assert!(html.contains("This field is required."));
        assert!(html.contains("maxlength=\"50\""));
        assert!(html.contains("maxlength=\"100\""));
    }
}
