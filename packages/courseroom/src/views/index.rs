use live_updates::Nonce;
use maud::{Markup, html};

use crate::models::CourseSummary;

use super::layout;

pub fn index_page(courses: &[CourseSummary], nonce: Option<&Nonce>) -> Markup {
    let content = html! {
        h2 { "Courses" }
        @if courses.is_empty() {
            p class="empty" { "No courses yet." }
        } @else {
            ul class="courses" {
                @for course in courses {
                    li {
                        a href={ "/courses/" (course.id) } { (course.name) }
                        " "
                        span class="meta" {
                            (course.message_count)
                            @if course.message_count == 1 { " message" } @else { " messages" }
                        }
                    }
                }
            }
        }
        form method="post" action="/courses" {
            input type="text" name="name" placeholder="New course" required;
            button type="submit" { "Create" }
        }
    };
    layout("Courses", nonce, content)
}
