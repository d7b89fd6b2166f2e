use live_updates::Nonce;
use maud::{Markup, html};

use crate::models::{Course, Message};

use super::{layout, timestamp};

pub fn course_page(course: &Course, messages: &[Message], nonce: Option<&Nonce>) -> Markup {
    let content = html! {
        h2 { (course.name) }
        p class="meta" { "Opened " (timestamp(course.created_at)) }
        @if messages.is_empty() {
            p class="empty" { "Nothing posted yet." }
        } @else {
            ol class="messages" id="messages" {
                @for message in messages {
                    li id={ "message-" (message.id) } {
                        strong { (message.author) }
                        " "
                        span class="meta" { (timestamp(message.created_at)) }
                        p { (message.body) }
                    }
                }
            }
        }
        form method="post" action={ "/courses/" (course.id) "/messages" } {
            input type="text" name="author" placeholder="Name" required;
            input type="text" name="body" placeholder="Message" required autocomplete="off";
            button type="submit" { "Post" }
        }
    };
    layout(&course.name, nonce, content)
}
