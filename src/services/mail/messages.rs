//! Message builders. Every user-supplied value placed in an HTML body goes
//! through `ammonia::clean_text`.

use ammonia::clean_text;
use chrono::{DateTime, Utc};

use super::Email;

fn html_page(heading: &str, body: &str) -> String {
    format!(
        "<html><body style=\"font-family: Arial, sans-serif; color: #222;\">\
         <h2>{}</h2>{}<p style=\"color:#888;font-size:12px;\">QuizMaster</p></body></html>",
        clean_text(heading),
        body
    )
}

fn link_button(url: &str, label: &str) -> String {
    format!(
        "<p><a href=\"{}\" style=\"background:#4f46e5;color:#fff;padding:10px 16px;\
         border-radius:6px;text-decoration:none;\">{}</a></p>",
        clean_text(url),
        clean_text(label)
    )
}

pub fn activation(to: &str, name: &str, link: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Activate your QuizMaster account".to_string(),
        text: format!(
            "Hi {name},\n\nPlease confirm your e-mail address to activate your account:\n{link}\n\n\
             If you did not sign up, ignore this message."
        ),
        html: html_page(
            "Activate your account",
            &format!(
                "<p>Hi {},</p><p>Please confirm your e-mail address to activate your account.</p>{}",
                clean_text(name),
                link_button(link, "Activate account")
            ),
        ),
    }
}

pub fn welcome(to: &str, name: &str, dashboard_link: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Welcome to QuizMaster!".to_string(),
        text: format!(
            "Hi {name},\n\nYour account is active. Start your first quiz here:\n{dashboard_link}"
        ),
        html: html_page(
            "Welcome aboard",
            &format!(
                "<p>Hi {},</p><p>Your account is active. Good luck with your first quiz!</p>{}",
                clean_text(name),
                link_button(dashboard_link, "Go to dashboard")
            ),
        ),
    }
}

pub fn password_reset(to: &str, name: &str, link: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: "Reset your QuizMaster password".to_string(),
        text: format!(
            "Hi {name},\n\nUse this link to choose a new password:\n{link}\n\n\
             If you did not request a reset, you can ignore this e-mail."
        ),
        html: html_page(
            "Password reset",
            &format!(
                "<p>Hi {},</p><p>Use the button below to choose a new password.</p>{}\
                 <p>If you did not request a reset, you can ignore this e-mail.</p>",
                clean_text(name),
                link_button(link, "Reset password")
            ),
        ),
    }
}

pub fn profile_updated(to: &str, name: &str, changed_at: DateTime<Utc>) -> Email {
    let when = changed_at.format("%B %d, %Y %H:%M UTC").to_string();
    Email {
        to: to.to_string(),
        subject: "Security alert: your profile was updated".to_string(),
        text: format!(
            "Hi {name},\n\nYour profile details were changed on {when}.\n\
             If this was not you, reset your password immediately."
        ),
        html: html_page(
            "Profile updated",
            &format!(
                "<p>Hi {},</p><p>Your profile details were changed on {}.</p>\
                 <p>If this was not you, reset your password immediately.</p>",
                clean_text(name),
                clean_text(&when)
            ),
        ),
    }
}

pub struct HackathonResult<'a> {
    pub to: &'a str,
    pub name: &'a str,
    pub quiz_title: &'a str,
    pub score: i32,
    pub total: i64,
    pub percentage: f64,
    pub passed: bool,
    pub result_link: &'a str,
}

pub fn hackathon_result(r: &HackathonResult<'_>) -> Email {
    let percentage = (r.percentage * 10.0).round() / 10.0;
    let verdict = if r.passed { "Passed" } else { "Not passed" };
    Email {
        to: r.to.to_string(),
        subject: format!("Your Hackathon Results: {}", r.quiz_title),
        text: format!(
            "You scored {percentage}% in {}. Check your results on the dashboard.\n{}",
            r.quiz_title, r.result_link
        ),
        html: html_page(
            "Hackathon results",
            &format!(
                "<p>Hi {},</p><p>You answered <strong>{} of {}</strong> questions correctly \
                 in <strong>{}</strong> ({}%).</p><p>Result: <strong>{}</strong></p>{}",
                clean_text(r.name),
                r.score,
                r.total,
                clean_text(r.quiz_title),
                percentage,
                verdict,
                link_button(r.result_link, "View result")
            ),
        ),
    }
}

pub fn ai_quiz_ready(to: &str, name: &str, quiz_title: &str, question_count: usize, link: &str) -> Email {
    Email {
        to: to.to_string(),
        subject: format!("Your AI quiz is ready: {quiz_title}"),
        text: format!(
            "Hi {name},\n\nYour quiz \"{quiz_title}\" with {question_count} questions is ready:\n{link}"
        ),
        html: html_page(
            "Your AI quiz is ready",
            &format!(
                "<p>Hi {},</p><p>Your quiz <strong>{}</strong> with {} questions is ready.</p>{}",
                clean_text(name),
                clean_text(quiz_title),
                question_count,
                link_button(link, "Start quiz")
            ),
        ),
    }
}

pub struct ClassReminder<'a> {
    pub to: &'a str,
    pub name: &'a str,
    pub subject: &'a str,
    pub time_str: &'a str,
    pub topic: &'a str,
    pub start_time: DateTime<Utc>,
    pub dashboard_link: &'a str,
}

pub fn class_reminder(r: &ClassReminder<'_>) -> Email {
    let start = r.start_time.format("%I:%M %p UTC").to_string();
    Email {
        to: r.to.to_string(),
        subject: r.subject.to_string(),
        text: format!(
            "Hello {},\n\nYour class is starting in about {}.\n\nTopic: {}\nStart Time: {}\n\n\
             Link: {}\n\nSee you there!",
            r.name, r.time_str, r.topic, start, r.dashboard_link
        ),
        html: html_page(
            "Class reminder",
            &format!(
                "<p>Hello {},</p><p>Your class is starting in about <strong>{}</strong>.</p>\
                 <p>Topic: {}<br>Start Time: {}</p>{}",
                clean_text(r.name),
                clean_text(r.time_str),
                clean_text(r.topic),
                clean_text(&start),
                link_button(r.dashboard_link, "Open training dashboard")
            ),
        ),
    }
}
